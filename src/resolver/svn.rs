//! Subversion sources.

use anyhow::Result;
use std::path::Path;

use super::{Materialized, Resolver};
use crate::core::LogData;
use crate::vcs::svn;

impl Resolver {
    pub(super) async fn materialize_svn(&self, dir: &Path) -> Result<Materialized> {
        let resolution = self.find_resolution().await?;
        self.logger.action(
            "export",
            &svn::export_path(&resolution),
            LogData::default().with_extra(serde_json::json!({ "resolution": resolution })),
        );
        svn::export(&self.source, &resolution, dir, &self.ctx.pool).await?;
        Ok(Materialized::vcs(resolution))
    }
}
