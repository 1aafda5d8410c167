use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, NotSet, QueryFilter, Set};
use sea_orm_migration::MigratorTrait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vpn_dist::clock::{Clock, SystemClock};
use vpn_dist::config::{load_config, AdminConfig};
use vpn_dist::entity::{user, User};
use vpn_dist::jobs::{PeriodicJob, Scheduler};
use vpn_dist::panel::{PanelApi, XuiPanelClient};
use vpn_dist::{api, auth, migration, AppState};

const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Parser, Debug)]
#[command(name = "vpn-dist", about = "流量套餐分销后端")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化 tracing 日志系统
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();

    let config = load_config(args.config.as_deref())?;
    info!("📋 vpn-dist 启动");
    info!("🌐 Web API 端口: {}", config.web_port);
    info!("🔗 面板地址: {}{}", config.panel.base_url, config.panel.panel_path);

    // 初始化数据库
    let db = migration::connect(&config.db_path).await?;
    migration::Migrator::up(&db, None).await?;
    info!("✅ 数据库初始化完成");

    initialize_admin_user(&db, &config.admin).await;

    let jwt_secret = config.get_jwt_secret()?;

    let panel_client = XuiPanelClient::new(&config.panel).context("创建面板客户端失败")?;
    if let Err(e) = panel_client.login().await {
        tracing::warn!("面板登录失败，将在首次调用时重试: {}", e);
    }
    let panel: Arc<dyn PanelApi> = Arc::new(panel_client);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let sync_interval = Duration::from_secs(config.jobs.traffic_sync_interval_minutes.max(1) * 60);
    let app_state = AppState::new(db, config, jwt_secret, panel, clock);

    // 启动定时任务
    let mut scheduler = Scheduler::new();
    let traffic_sync: Arc<dyn PeriodicJob> = app_state.traffic_sync.clone();
    let expiry_sweep: Arc<dyn PeriodicJob> = app_state.expiry_sweep.clone();
    scheduler.spawn_periodic(sync_interval, traffic_sync);
    scheduler.spawn_periodic(EXPIRY_SWEEP_INTERVAL, expiry_sweep);
    info!(
        "⏱️ 定时任务已启动: 流量同步每 {} 分钟, 过期清理每 60 分钟",
        sync_interval.as_secs() / 60
    );

    // 启动 Web API 服务
    let web_handle = api::start_web_server(app_state);

    info!("✅ 所有服务已启动，等待终止信号...");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("收到 Ctrl+C 信号，正在关闭服务...");
        }
        _ = wait_for_sigterm() => {
            info!("收到 SIGTERM 信号，正在关闭服务...");
        }
    }

    scheduler.shutdown();
    web_handle.abort();

    Ok(())
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::error!("无法监听 SIGTERM: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}

/// 初始化管理员用户
async fn initialize_admin_user(db: &DatabaseConnection, admin: &AdminConfig) {
    let email = admin.email.trim().to_lowercase();

    match User::find()
        .filter(user::Column::Email.eq(email.as_str()))
        .one(db)
        .await
    {
        Ok(Some(_)) => {
            info!("🔐 管理员用户已存在");
        }
        Ok(None) => {
            let password = auth::generate_random_password(16);
            let password_hash = match auth::hash_password(&password) {
                Ok(hash) => hash,
                Err(e) => {
                    tracing::error!("管理员密码哈希失败: {}", e);
                    return;
                }
            };

            let now = Utc::now().naive_utc();
            let admin_user = user::ActiveModel {
                id: NotSet,
                email: Set(email.clone()),
                password_hash: Set(password_hash),
                is_admin: Set(true),
                is_active: Set(true),
                created_at: Set(now),
                updated_at: Set(now),
            };

            match admin_user.insert(db).await {
                Ok(_) => {
                    info!("🔐 管理员用户已创建");
                    info!("═══════════════════════════════════════════════════════════════");
                    info!("👤 管理员邮箱: {}", email);
                    info!("🔑 管理员密码: {}", password);
                    info!("⚠️  请妥善保存此密码，仅在创建时显示一次！");
                    info!("═══════════════════════════════════════════════════════════════");

                    let data_dir = PathBuf::from("./data");
                    if let Err(e) = std::fs::create_dir_all(&data_dir) {
                        tracing::error!("无法创建 data 目录: {}", e);
                    } else {
                        let password_file = data_dir.join("admin_password.txt");
                        let content = format!(
                            "管理员初始密码\n═══════════════════════════════════════\n邮箱: {}\n密码: {}\n═══════════════════════════════════════\n⚠️ 请妥善保管此文件，登录后建议修改密码并删除此文件！\n",
                            email, password
                        );
                        match std::fs::write(&password_file, &content) {
                            Ok(_) => info!("📁 密码已保存到: {}", password_file.display()),
                            Err(e) => tracing::error!("无法保存密码文件: {}", e),
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("创建管理员用户失败: {}", e);
                }
            }
        }
        Err(e) => {
            tracing::error!("检查管理员用户失败: {}", e);
        }
    }
}
