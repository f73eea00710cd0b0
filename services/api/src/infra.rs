use crate::cli::RosterArgs;
use dorm_alloc::allocation::{
    default_weights, AllocationConfig, AllocationError, AllocationService, AllocationStores,
    CapacityPolicy, ConfigId, ConfigStatus, EngineSettings, InMemoryStore, OrgGrouping,
};
use dorm_alloc::error::AppError;
use dorm_alloc::roster::Roster;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Id of the allocation config every process starts with.
pub(crate) const DEFAULT_CONFIG_ID: &str = "default";

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) fn default_config(algorithm: &str) -> AllocationConfig {
    AllocationConfig {
        id: ConfigId(DEFAULT_CONFIG_ID.to_string()),
        name: "Default allocation".to_string(),
        algorithm_code: algorithm.to_string(),
        weights: default_weights(),
        enforce_gender: true,
        capacity: CapacityPolicy::FillAll,
        grouping: OrgGrouping::None,
        status: ConfigStatus::Enabled,
        exclusive: false,
    }
}

/// Store holding the default config plus the roster, when one was given.
pub(crate) fn hydrated_store(roster: &RosterArgs) -> Result<Arc<InMemoryStore>, AppError> {
    let store = Arc::new(InMemoryStore::new());
    if let (Some(students), Some(beds)) = (&roster.students, &roster.beds) {
        Roster::from_paths(students, beds)?.load_into(&store)?;
    }
    store
        .insert_config(default_config(&roster.algorithm))
        .map_err(AllocationError::from)?;
    Ok(store)
}

pub(crate) fn allocation_service(
    store: &Arc<InMemoryStore>,
    settings: EngineSettings,
) -> Arc<AllocationService> {
    Arc::new(AllocationService::with_default_strategies(
        AllocationStores::shared(store.clone()),
        settings,
    ))
}
