//! The generator contract: the engine drives an external collaborator that
//! turns a component's declarative input into manifests. This crate depends only on the
//! contract — concrete generators are black boxes it never implements.

use crate::object::Object;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct GeneratorContext {
    pub component_name: String,
    pub component_revision: String,
    pub namespace: Option<String>,
}

#[derive(Debug, Error)]
#[error("generator failed: {0}")]
pub struct GeneratorError(pub String);

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, ctx: &GeneratorContext) -> Result<Vec<Object>, GeneratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Any `Generator` plugs into the engine through the trait alone — exercised here
    /// with a mocked implementation instead of a real generator binary.
    #[tokio::test]
    async fn a_mocked_generator_satisfies_the_trait_object() {
        let mut mock = MockGenerator::new();
        mock.expect_generate()
            .returning(|_ctx| Ok(Vec::new()));

        let generator: std::sync::Arc<dyn Generator> = std::sync::Arc::new(mock);
        let ctx = GeneratorContext {
            component_name: "demo".to_string(),
            component_revision: "1".to_string(),
            namespace: None,
        };
        assert!(generator.generate(&ctx).await.unwrap().is_empty());
    }
}
