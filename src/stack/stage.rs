use std::sync::Arc;

use crate::stack::middleware::{Handler, Middleware, compose};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageName {
    Initialize,
    Serialize,
    Build,
    Finalize,
    Deserialize,
}

impl StageName {
    pub const ALL: [StageName; 5] = [
        Self::Initialize,
        Self::Serialize,
        Self::Build,
        Self::Finalize,
        Self::Deserialize,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Serialize => "serialize",
            Self::Build => "build",
            Self::Finalize => "finalize",
            Self::Deserialize => "deserialize",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Where a new middleware goes relative to those already registered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Position {
    /// Outermost: runs before everything already in the stage.
    Before,
    /// Innermost: runs after everything already in the stage.
    #[default]
    After,
}

/// Ordered middlewares of one stage.
pub struct Stage<I, O> {
    name: StageName,
    middlewares: Vec<Arc<dyn Middleware<I, O>>>,
}

impl<I, O> Stage<I, O> {
    pub fn new(name: StageName) -> Self {
        Self {
            name,
            middlewares: Vec::new(),
        }
    }

    pub fn name(&self) -> StageName {
        self.name
    }

    pub fn register(&mut self, middleware: impl Middleware<I, O> + 'static, position: Position) {
        self.register_shared(Arc::new(middleware), position);
    }

    pub fn register_shared(&mut self, middleware: Arc<dyn Middleware<I, O>>, position: Position) {
        match position {
            Position::Before => self.middlewares.insert(0, middleware),
            Position::After => self.middlewares.push(middleware),
        }
    }

    /// Removes every middleware registered under `id`; returns whether any
    /// was found.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.middlewares.len();
        self.middlewares.retain(|middleware| middleware.id() != id);
        self.middlewares.len() != before
    }

    pub fn contains(&self, id: &str) -> bool {
        self.middlewares.iter().any(|middleware| middleware.id() == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.middlewares
            .iter()
            .map(|middleware| middleware.id())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

impl<I, O> Stage<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub(crate) fn compose(&self, terminal: Arc<dyn Handler<I, O>>) -> Arc<dyn Handler<I, O>> {
        compose(&self.middlewares, terminal)
    }
}

impl<I, O> std::fmt::Debug for Stage<I, O> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Stage")
            .field("name", &self.name)
            .field("middlewares", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::{Position, Stage, StageName};
    use crate::Result;
    use crate::context::CallContext;
    use crate::stack::middleware::{Handler, Middleware};

    struct Named(&'static str);

    #[async_trait]
    impl Middleware<(), ()> for Named {
        fn id(&self) -> &str {
            self.0
        }

        async fn handle(
            &self,
            context: &mut CallContext,
            input: (),
            next: &dyn Handler<(), ()>,
        ) -> Result<()> {
            next.call(context, input).await
        }
    }

    #[test]
    fn positions_prepend_and_append() {
        let mut stage = Stage::<(), ()>::new(StageName::Build);
        stage.register(Named("middle"), Position::After);
        stage.register(Named("last"), Position::After);
        stage.register(Named("first"), Position::Before);
        assert_eq!(stage.ids(), vec!["first", "middle", "last"]);
        assert_eq!(stage.name().to_string(), "build");
    }

    #[test]
    fn remove_by_id() {
        let mut stage = Stage::<(), ()>::new(StageName::Finalize);
        stage.register(Named("keep"), Position::After);
        stage.register(Named("drop"), Position::After);
        assert!(stage.remove("drop"));
        assert!(!stage.remove("drop"));
        assert!(stage.contains("keep"));
        assert_eq!(stage.len(), 1);
    }
}
