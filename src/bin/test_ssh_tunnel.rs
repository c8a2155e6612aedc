//! SSH tunnel smoke test
//!
//! Opens a tunnel to PostgreSQL through a password-authenticated SSH server,
//! then connects through it twice: once with a raw tunnel and sqlx, once with
//! `DatabaseManager` doing the tunnel setup itself.
//!
//! Prerequisites: an SSH server on 127.0.0.1:2222 (testuser/testpass) that
//! can reach a PostgreSQL host named `postgres` on port 5432.
//!
//! Run with:
//!   cargo run --bin test_ssh_tunnel

use std::time::Duration;

use anyhow::{Context, Result, ensure};
use dbdeck::database::{ConnectionConfig, DatabaseManager};
use dbdeck::ssh::{SshTunnel, SshTunnelConfig, TunnelState};

const SSH_HOST: &str = "127.0.0.1";
const SSH_PORT: u16 = 2222;
const SSH_USER: &str = "testuser";
const SSH_PASS: &str = "testpass";

const PG_REMOTE_HOST: &str = "postgres";
const PG_REMOTE_PORT: u16 = 5432;
const PG_USER: &str = "pguser";
const PG_PASS: &str = "pgpass";
const PG_DB: &str = "testdb";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dbdeck=debug,warn")),
        )
        .init();

    println!("━━━ Test 1: Raw tunnel with sqlx ━━━");
    test_tunnel_with_sqlx().await?;

    println!("\n━━━ Test 2: Bad password is rejected ━━━");
    test_bad_password().await?;

    println!("\n━━━ Test 3: DatabaseManager over SSH ━━━");
    test_manager_over_ssh().await?;

    println!("\nAll tests passed");
    Ok(())
}

fn tunnel_config(password: &str) -> SshTunnelConfig {
    SshTunnelConfig::with_password(
        SSH_HOST,
        SSH_PORT,
        SSH_USER,
        password,
        PG_REMOTE_HOST,
        PG_REMOTE_PORT,
    )
    .with_timeout(Duration::from_secs(10))
}

async fn test_tunnel_with_sqlx() -> Result<()> {
    use sqlx::Row;
    use sqlx::postgres::PgPoolOptions;

    let mut tunnel = SshTunnel::new(tunnel_config(SSH_PASS))?;
    let local_addr = tunnel.start().await?;
    ensure!(tunnel.state() == TunnelState::Active, "tunnel not active");
    println!("  → Tunnel listening on {}", local_addr);

    let url = format!("postgres://{PG_USER}:{PG_PASS}@{local_addr}/{PG_DB}");
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&url)
        .await
        .context("sqlx could not connect through the tunnel")?;

    let row = sqlx::query("SELECT version()").fetch_one(&pool).await?;
    let version: String = row.get(0);
    println!("  ✓ {}", version.split(',').next().unwrap_or(&version));

    pool.close().await;
    tunnel.close().await?;
    ensure!(tunnel.state() == TunnelState::Closed, "tunnel not closed");

    tokio::time::sleep(Duration::from_millis(200)).await;
    ensure!(
        tokio::net::TcpStream::connect(local_addr).await.is_err(),
        "local port still accepting after close"
    );
    println!("  ✓ Tunnel closed and port {} released", local_addr.port());
    Ok(())
}

async fn test_bad_password() -> Result<()> {
    let mut tunnel = SshTunnel::new(tunnel_config("wrong"))?;
    match tunnel.start().await {
        Ok(_) => anyhow::bail!("authentication with a wrong password succeeded"),
        Err(e) => println!("  ✓ {}", e),
    }
    Ok(())
}

async fn test_manager_over_ssh() -> Result<()> {
    let config = ConnectionConfig {
        db_type: "postgres".into(),
        host: PG_REMOTE_HOST.into(),
        port: PG_REMOTE_PORT,
        user: PG_USER.into(),
        password: PG_PASS.into(),
        database: PG_DB.into(),
        use_ssh_tunnel: true,
        ssh_host: SSH_HOST.into(),
        ssh_port: SSH_PORT,
        ssh_user: SSH_USER.into(),
        ssh_password: SSH_PASS.into(),
        ..Default::default()
    };

    let manager = DatabaseManager::new();
    ensure!(manager.test_connection(&config).await?, "test_connection failed");
    ensure!(!manager.is_connected().await, "test_connection left a session");
    println!("  ✓ test_connection through SSH");

    manager.connect(config).await?;
    println!(
        "  → Connected to {}",
        manager.display_target().await.unwrap_or_default()
    );

    let databases = manager.list_databases().await?;
    ensure!(
        databases.iter().any(|d| d.name == PG_DB),
        "{PG_DB} missing from database list"
    );
    println!("  ✓ {} databases listed", databases.len());

    let result = manager.execute_query("SELECT 1 + 1 AS two").await?;
    println!("  ✓ SELECT 1 + 1 = {}", result.rows[0][0]);

    manager.disconnect().await?;
    ensure!(!manager.is_connected().await, "still connected");
    println!("  ✓ Disconnected");
    Ok(())
}
