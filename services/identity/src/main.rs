use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use common::database::{self, DatabaseConfig};
use identity::{
    AppState,
    clock::{Clock, SystemClock},
    credentials::LockoutConfig,
    erp::{ErpConfig, HttpErpClient, IdentitySynchronizer},
    jwt::{JwtConfig, JwtService},
    notifier::LogNotifier,
    password::PasswordHasher,
    repositories::{MemoryUserStore, UserRepository, UserStore},
    reset::ResetConfig,
    routes,
    session::{SessionConfig, SessionService},
};

/// Listener configuration
#[derive(Debug, Clone)]
struct ServerConfig {
    bind_address: String,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
        }
    }
}

async fn init_store() -> Result<Arc<dyn UserStore>> {
    if std::env::var("IDENTITY_STORE").is_ok_and(|v| v.eq_ignore_ascii_case("memory")) {
        warn!("Using the in-memory identity store; records are lost on restart");
        return Ok(Arc::new(MemoryUserStore::new()));
    }

    let db_config = DatabaseConfig::from_env()?;
    let pool = database::init_pool(&db_config).await?;

    if database::health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    let repository = UserRepository::new(pool);
    repository.migrate().await?;
    info!("Database migrations applied");

    Ok(Arc::new(repository))
}

fn init_erp() -> Result<IdentitySynchronizer> {
    match ErpConfig::from_env()? {
        Some(config) => {
            info!("ERP bridge enabled for {}", config.base_url);
            let client = HttpErpClient::new(&config)?;
            Ok(IdentitySynchronizer::new(Arc::new(client), config.timeout()))
        }
        None => {
            info!("ERP_BASE_URL not set; ERP bridge disabled");
            Ok(IdentitySynchronizer::disabled())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting identity service");

    let server_config = ServerConfig::from_env();
    let session_config = SessionConfig {
        lockout: LockoutConfig::from_env()?,
        reset: ResetConfig::from_env()?,
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let jwt_service = JwtService::new(JwtConfig::from_env()?, clock.clone())?;
    let store = init_store().await?;
    let erp = init_erp()?;

    let session = SessionService::new(
        store,
        Arc::new(LogNotifier),
        erp,
        jwt_service,
        PasswordHasher::default(),
        session_config,
        clock,
    );

    let app = routes::create_router(AppState::new(session));

    let listener = TcpListener::bind(&server_config.bind_address).await?;
    info!("Identity service listening on {}", server_config.bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
