//! Extension wiring the catalog and epoch sources to retroconfig
//!
//! ```no_run
//! use retroconfig::get_config;
//! use retrocatalog::CatalogConfigExt;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = get_config();
//! let catalog = config.catalog_loader()?.load().await?;
//! println!("{} channels", catalog.len());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use retroconfig::Config;

use crate::client::RetroApiClient;
use crate::epoch::{EpochSource, HttpEpochSource};
use crate::loader::CatalogLoader;

pub trait CatalogConfigExt {
    /// HTTP timeout shared by the catalog and epoch requests
    fn get_catalog_http_timeout(&self) -> Result<Duration>;

    /// API client carrying the configured timeout and viewer id
    fn retro_api_client(&self) -> Result<RetroApiClient>;

    /// Loader over the configured snapshot path and, if set, the catalog URL
    fn catalog_loader(&self) -> Result<CatalogLoader>;

    /// Remote epoch source, `None` when no epoch URL is configured
    fn epoch_source(&self) -> Result<Option<Arc<dyn EpochSource>>>;
}

impl CatalogConfigExt for Config {
    fn get_catalog_http_timeout(&self) -> Result<Duration> {
        Ok(Duration::from_millis(self.get_catalog_http_timeout_ms()?))
    }

    fn retro_api_client(&self) -> Result<RetroApiClient> {
        let client = RetroApiClient::builder()
            .timeout(self.get_catalog_http_timeout()?)
            .viewer_id(self.get_viewer_id()?)
            .build()?;
        Ok(client)
    }

    fn catalog_loader(&self) -> Result<CatalogLoader> {
        let mut loader =
            CatalogLoader::new().with_snapshot(PathBuf::from(self.get_catalog_snapshot_path()?));
        if let Some(url) = self.get_catalog_url()? {
            loader = loader.with_remote(self.retro_api_client()?, url);
        }
        Ok(loader)
    }

    fn epoch_source(&self) -> Result<Option<Arc<dyn EpochSource>>> {
        match self.get_epoch_url()? {
            Some(url) => {
                let source: Arc<dyn EpochSource> =
                    Arc::new(HttpEpochSource::new(self.retro_api_client()?, url));
                Ok(Some(source))
            }
            None => Ok(None),
        }
    }
}
