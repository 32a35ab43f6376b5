//! Multi-site driver
//!
//! The [`Spider`] owns every configured [`Site`] and runs one operation on all
//! of them, or on a selected one, concurrently. Sites share the process-wide
//! request budget and cancellation token of one [`CrawlContext`]; a failing
//! site never stops the others.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::Summary;
use crate::site::{
    BackupReport, BatchReport, CheckEndReport, CheckReport, CrawlContext, ExploreReport, FixReport,
    ProcessReport, Site,
};
use crate::storage::BookRepository;

/// Operation run on every selected site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Explore,
    Update,
    UpdateError,
    Download,
    Fix,
    Check,
    CheckEnd,
    Backup,
    Info,
    Process,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explore => "explore",
            Self::Update => "update",
            Self::UpdateError => "update-error",
            Self::Download => "download",
            Self::Fix => "fix",
            Self::Check => "check",
            Self::CheckEnd => "check-end",
            Self::Backup => "backup",
            Self::Info => "info",
            Self::Process => "process",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report of one operation on one site
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OperationReport {
    Explore(ExploreReport),
    Batch(BatchReport),
    Fix(FixReport),
    Check(CheckReport),
    CheckEnd(CheckEndReport),
    Backup(BackupReport),
    Info(Summary),
    Process(ProcessReport),
}

/// Result of an operation on one site
#[derive(Debug, Clone, Serialize)]
pub struct SiteOutcome {
    pub site: String,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<OperationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SiteOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Every configured site plus their shared context
pub struct Spider {
    context: CrawlContext,
    sites: BTreeMap<String, Arc<Site>>,
}

impl Spider {
    pub fn new(context: CrawlContext) -> Self {
        Self {
            context,
            sites: BTreeMap::new(),
        }
    }

    /// Build every site of `config`, parsed with its configured selectors
    ///
    /// # Errors
    ///
    /// Returns an error if a site cannot be built
    pub fn from_config(config: &Config, repo: Arc<dyn BookRepository>) -> Result<Self> {
        let mut spider = Self::new(CrawlContext::new(config.max_threads));

        for (name, site_config) in &config.sites {
            let site = Site::from_config(
                name.clone(),
                site_config.clone(),
                spider.context.clone(),
                Arc::clone(&repo),
            )?;
            spider.add_site(site);
        }

        info!(sites = spider.sites.len(), max_threads = config.max_threads, "Spider ready");
        Ok(spider)
    }

    pub fn add_site(&mut self, site: Site) {
        self.sites.insert(site.name().to_string(), Arc::new(site));
    }

    pub fn site(&self, name: &str) -> Option<&Arc<Site>> {
        self.sites.get(name)
    }

    pub fn site_names(&self) -> Vec<&str> {
        self.sites.keys().map(String::as_str).collect()
    }

    pub fn context(&self) -> &CrawlContext {
        &self.context
    }

    /// Run `operation` on every site, or only on `site` when given
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `site` is not configured; failures of
    /// the operation itself are reported per site
    pub async fn run(&self, operation: Operation, site: Option<&str>) -> Result<Vec<SiteOutcome>> {
        let targets: Vec<Arc<Site>> = match site {
            Some(name) => {
                let site = self
                    .sites
                    .get(name)
                    .ok_or_else(|| Error::config(format!("unknown site {name}")))?;
                vec![Arc::clone(site)]
            }
            None => self.sites.values().cloned().collect(),
        };

        info!(%operation, sites = targets.len(), "Running operation");

        let outcomes = join_all(targets.iter().map(|site| async move {
            let result = run_operation(site, operation).await;
            match result {
                Ok(report) => SiteOutcome {
                    site: site.name().to_string(),
                    operation: operation.to_string(),
                    report: Some(report),
                    error: None,
                },
                Err(err) => {
                    error!(site = %site.name(), %operation, error = %err, "Operation failed");
                    SiteOutcome {
                        site: site.name().to_string(),
                        operation: operation.to_string(),
                        report: None,
                        error: Some(err.to_string()),
                    }
                }
            }
        }))
        .await;

        Ok(outcomes)
    }

    /// Stop admitting new requests on every site
    pub fn cancel(&self) {
        self.context.cancel();
    }
}

async fn run_operation(site: &Site, operation: Operation) -> Result<OperationReport> {
    Ok(match operation {
        Operation::Explore => OperationReport::Explore(site.explore().await?),
        Operation::Update => OperationReport::Batch(site.update().await?),
        Operation::UpdateError => OperationReport::Batch(site.update_error().await?),
        Operation::Download => OperationReport::Batch(site.download().await?),
        Operation::Fix => OperationReport::Fix(site.fix().await?),
        Operation::Check => OperationReport::Check(site.check()?),
        Operation::CheckEnd => OperationReport::CheckEnd(site.check_end()?),
        Operation::Backup => OperationReport::Backup(site.backup().await?),
        Operation::Info => OperationReport::Info(site.info()?),
        Operation::Process => OperationReport::Process(site.process().await),
    })
}
