use messaging_client::sandbox::{SandboxClient, SandboxNetwork};
use std::sync::Arc;
use std::time::Duration;

use crate::AppState;
use crate::config::{AuthConfig, HubConfig, SessionsConfig};
use crate::db::Database;
use crate::manager::{SessionManager, SessionStatus};
use crate::metrics::HubMetrics;
use crate::pairing::PairingOutcome;
use crate::repository::{HubRepository, test_helpers::test_repository};
use crate::session::Session;
use crate::tenant::TenantId;

/// A session manager over the given sandbox and a fresh in-memory database
pub async fn test_manager(network: SandboxNetwork) -> (SessionManager, SandboxNetwork) {
    let repository = test_repository().await;
    let manager = SessionManager::new(
        Arc::new(network.clone()),
        repository,
        Arc::new(HubMetrics::new()),
        SessionsConfig::default(),
    );
    (manager, network)
}

/// Pair `tenant` end to end through the sandbox and wait until it reports
/// connected and logged in.
pub async fn paired_session(
    manager: &SessionManager,
    network: &SandboxNetwork,
    tenant: TenantId,
) -> (Arc<Session>, Arc<SandboxClient>) {
    match manager.request_pairing_code(tenant).await.expect("pairing code") {
        PairingOutcome::CodeIssued(code) => assert!(code.code.starts_with("2@")),
        other => panic!("expected a code, got {:?}", other),
    }
    let sandbox = network
        .client(&tenant.store_label())
        .expect("sandbox client");
    sandbox.scan().expect("scan");

    for _ in 0..100 {
        if manager.current_status(tenant).await.expect("status")
            == SessionStatus::ConnectedAndLoggedIn
        {
            let session = manager.registry().lookup(tenant).await.expect("session");
            return (session, sandbox);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("tenant {} never finished pairing", tenant);
}

/// Build a fully-wired `AppState` backed by an in-memory SQLite database and
/// the sandbox network, with tenant auth enabled.
///
/// Callers must hold the returned `TempDir` for the lifetime of the test.
pub async fn test_app_state() -> (AppState, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = HubConfig::new(Some(tmp.path().to_path_buf())).expect("config");

    let repository: HubRepository = test_repository().await;
    let db = Arc::new(Database {
        pool: repository.pool.clone(),
    });
    let metrics = Arc::new(HubMetrics::new());
    let network = SandboxNetwork::default();
    let manager = SessionManager::new(
        Arc::new(network.clone()),
        repository.clone(),
        metrics.clone(),
        SessionsConfig::default(),
    );

    let state = AppState {
        manager,
        repository,
        db,
        metrics,
        config: Arc::new(config),
        auth_config: Arc::new(AuthConfig { enabled: true }),
        sandbox: Some(network),
    };

    (state, tmp)
}
