use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;
use crate::context::CallContext;

/// The continuation a middleware delegates to.
#[async_trait]
pub trait Handler<I, O>: Send + Sync {
    async fn call(&self, context: &mut CallContext, input: I) -> Result<O>;
}

/// One step of a stage.
///
/// A middleware may mutate `input` before delegating to `next`, inspect or
/// rewrite the result on the way out, short-circuit by returning without
/// calling `next`, or call `next` several times (the retry middleware does).
#[async_trait]
pub trait Middleware<I, O>: Send + Sync {
    /// Identifier used for removal and ordering diagnostics.
    fn id(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn handle(
        &self,
        context: &mut CallContext,
        input: I,
        next: &dyn Handler<I, O>,
    ) -> Result<O>;
}

/// A middleware bound to its continuation.
pub(crate) struct ComposedHandler<I, O> {
    middleware: Arc<dyn Middleware<I, O>>,
    next: Arc<dyn Handler<I, O>>,
}

#[async_trait]
impl<I, O> Handler<I, O> for ComposedHandler<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn call(&self, context: &mut CallContext, input: I) -> Result<O> {
        self.middleware
            .handle(context, input, self.next.as_ref())
            .await
    }
}

/// Folds `middlewares` around `terminal`, first entry outermost.
pub(crate) fn compose<I, O>(
    middlewares: &[Arc<dyn Middleware<I, O>>],
    terminal: Arc<dyn Handler<I, O>>,
) -> Arc<dyn Handler<I, O>>
where
    I: Send + 'static,
    O: Send + 'static,
{
    middlewares
        .iter()
        .rev()
        .fold(terminal, |next, middleware| {
            Arc::new(ComposedHandler {
                middleware: Arc::clone(middleware),
                next,
            })
        })
}
