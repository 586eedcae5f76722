use std::sync::Arc;

use chrono::Duration;
use deskgate_core::authz::AuthorizationEngine;
use deskgate_core::policy::{
    CachedPolicyLoader, FileSpecSource, HttpSpecSource, SpecPolicyLoader, SpecSource,
};
use deskgate_core::rate_limit::RateLimiter;
use deskgate_core::routes::{RateClass, RouteAuthorizer};

use crate::config::{Config, SpecLocation};
use crate::store::LeadStore;
use crate::tools::ToolDispatcher;
use crate::tools::lead_intake::{self, LeadIntakeHandler};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub upstream: reqwest::Client,
    pub routes: Arc<RouteAuthorizer>,
    pub limiter: RateLimiter,
    pub policy: Arc<CachedPolicyLoader>,
    pub authz: AuthorizationEngine,
    pub dispatcher: Arc<ToolDispatcher>,
    pub leads: Arc<dyn LeadStore>,
}

impl AppState {
    pub fn new(
        config: Config,
        spec_source: Arc<dyn SpecSource>,
        leads: Arc<dyn LeadStore>,
    ) -> Result<Self, reqwest::Error> {
        // The gateway relays upstream responses as-is; never follow redirects.
        let upstream = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let ttl = Duration::seconds(i64::try_from(config.spec_cache_ttl_secs).unwrap_or(i64::MAX));
        let policy = Arc::new(CachedPolicyLoader::new(
            Arc::new(SpecPolicyLoader::new(spec_source)),
            ttl,
        ));
        let authz = AuthorizationEngine::new(policy.clone());
        let limiter = RateLimiter::in_memory();

        let dispatcher = ToolDispatcher::new(authz.clone(), limiter.clone(), config.tool_timeout)
            .register(
                lead_intake::HANDLER_REF,
                Arc::new(LeadIntakeHandler::new(leads.clone())),
            );

        Ok(Self {
            config: Arc::new(config),
            upstream,
            routes: Arc::new(RouteAuthorizer::ticketing()),
            limiter,
            policy,
            authz,
            dispatcher: Arc::new(dispatcher),
            leads,
        })
    }

    /// Per-minute budget for a proxy route class.
    pub fn class_limit(&self, class: RateClass) -> u32 {
        match class {
            RateClass::Standard => self.config.rate_limit_per_minute,
            RateClass::Messages => self.config.messages_rate_limit_per_minute,
        }
    }
}

/// Policy document source selected by configuration.
pub fn spec_source(config: &Config) -> Result<Arc<dyn SpecSource>, reqwest::Error> {
    Ok(match &config.spec {
        SpecLocation::Local(root) => Arc::new(FileSpecSource::new(root.clone())),
        SpecLocation::Remote(url) => {
            let client = reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()?;
            Arc::new(HttpSpecSource::new(url.as_str(), client))
        }
    })
}
