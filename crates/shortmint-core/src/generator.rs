use crate::base62::ShortCodeBase62;
use async_trait::async_trait;

/// Trait for generating short codes.
///
/// Implementations are pure generators that don't interact with record
/// storage. A failed call means no code was produced; callers must never
/// treat an error as a possibly issued code.
#[async_trait]
pub trait Generator: Send + Sync + 'static {
    type Output: Into<ShortCodeBase62> + Send;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Generates a value that converts into a globally unique short code.
    async fn generate(&self) -> Result<Self::Output, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Counter(AtomicU64);

    #[async_trait]
    impl Generator for Counter {
        type Output = ShortCodeBase62;
        type Error = CoreError;

        async fn generate(&self) -> Result<Self::Output, Self::Error> {
            Ok(ShortCodeBase62::encode(self.0.fetch_add(1, Ordering::SeqCst)))
        }
    }

    #[tokio::test]
    async fn generated_values_convert_into_short_codes() {
        let generator = Counter(AtomicU64::new(61));

        let first: ShortCodeBase62 = generator.generate().await.unwrap().into();
        let second: ShortCodeBase62 = generator.generate().await.unwrap().into();

        assert_eq!(first.as_str(), "Z");
        assert_eq!(second.as_str(), "01");
    }
}
