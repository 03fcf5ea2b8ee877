/// Synchronous consumer of published messages.
///
/// Handlers run on the publishing thread, so they must be quick and must not
/// publish on the same bus re-entrantly while holding their own locks.
pub trait EventHandler<M>: Send + Sync {
    /// Name used in logs when the handler fails.
    fn name(&self) -> &'static str;

    fn handle(&self, message: &M) -> anyhow::Result<()>;
}

/// Adapts a closure into an [`EventHandler`].
pub struct FnHandler<F> {
    name: &'static str,
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(name: &'static str, f: F) -> Self {
        Self { name, f }
    }
}

impl<M, F> EventHandler<M> for FnHandler<F>
where
    F: Fn(&M) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn handle(&self, message: &M) -> anyhow::Result<()> {
        (self.f)(message)
    }
}
