use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use todo_auth::auth::AuthService;
use todo_auth::configuration::{get_configuration, DatabaseBackend, DatabaseSettings};
use todo_auth::session::{MemoryDatabase, PgSessionFactory};
use todo_auth::startup::run;
use todo_auth::telemetry::init_telemetry;

async fn connect_postgres(settings: &DatabaseSettings) -> std::io::Result<PgSessionFactory> {
    tracing::info!(
        host = %settings.host,
        database = %settings.database_name,
        "Attempting to connect to database"
    );

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.connection_string())
        .await
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "Database connection error",
            )
        })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to run migrations: {}", e);
            std::io::Error::new(std::io::ErrorKind::Other, "Migration error")
        })?;

    tracing::info!("Database connection pool created successfully");
    Ok(PgSessionFactory::new(pool))
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    tracing::info!("Starting application");

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    let auth = AuthService::from_settings(&configuration.jwt).map_err(|e| {
        tracing::error!("Invalid JWT configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "Configuration error")
    })?;

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    let server = match configuration.database.backend {
        DatabaseBackend::Postgres => {
            let factory = connect_postgres(&configuration.database).await?;
            run(listener, factory, auth, configuration.cookie)?
        }
        DatabaseBackend::Memory => {
            tracing::warn!("Using in-memory storage; data is lost on shutdown");
            run(listener, MemoryDatabase::new(), auth, configuration.cookie)?
        }
    };

    tracing::info!("Server started successfully");
    server.await
}
