//! Concurrency governor (§4.F): four independent semaphores bounding
//! downloads, conversions, optimizations, and transcriptions so that a burst
//! in one stage can't starve the others.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone, Copy)]
pub struct GovernorConfig {
    pub downloads: usize,
    pub conversions: usize,
    pub optimizations: usize,
    pub transcriptions: usize,
}

impl From<&crate::config::Config> for GovernorConfig {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            downloads: config.download_concurrency,
            conversions: config.conversion_concurrency,
            optimizations: config.optimization_concurrency,
            transcriptions: config.transcription_concurrency,
        }
    }
}

/// Holds the four stage semaphores. Permits are acquired with
/// `acquire_owned` so they can be moved into a spawned task and held across
/// `.await` points without borrowing the governor itself.
pub struct Governor {
    downloads: Arc<Semaphore>,
    conversions: Arc<Semaphore>,
    optimizations: Arc<Semaphore>,
    transcriptions: Arc<Semaphore>,
}

impl Governor {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            downloads: Arc::new(Semaphore::new(config.downloads)),
            conversions: Arc::new(Semaphore::new(config.conversions)),
            optimizations: Arc::new(Semaphore::new(config.optimizations)),
            transcriptions: Arc::new(Semaphore::new(config.transcriptions)),
        }
    }

    pub async fn acquire_download(&self) -> OwnedSemaphorePermit {
        self.downloads.clone().acquire_owned().await.expect("download semaphore closed")
    }

    pub async fn acquire_conversion(&self) -> OwnedSemaphorePermit {
        self.conversions.clone().acquire_owned().await.expect("conversion semaphore closed")
    }

    pub async fn acquire_optimization(&self) -> OwnedSemaphorePermit {
        self.optimizations.clone().acquire_owned().await.expect("optimization semaphore closed")
    }

    pub async fn acquire_transcription(&self) -> OwnedSemaphorePermit {
        self.transcriptions.clone().acquire_owned().await.expect("transcription semaphore closed")
    }

    pub fn available_downloads(&self) -> usize {
        self.downloads.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stages_are_independently_bounded() {
        let governor = Governor::new(GovernorConfig {
            downloads: 1,
            conversions: 1,
            optimizations: 1,
            transcriptions: 1,
        });

        let download_permit = governor.acquire_download().await;
        assert_eq!(governor.available_downloads(), 0);

        // A conversion permit is independent of the exhausted download permit.
        let _conversion_permit = governor.acquire_conversion().await;

        drop(download_permit);
        assert_eq!(governor.available_downloads(), 1);
    }
}
