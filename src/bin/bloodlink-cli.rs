//! BloodLink CLI（测试版）
//!
//! 非交互式 CLI，用于演示聊天会话、会话列表和献血通知匹配

use anyhow::{anyhow, Context, Result};
use bloodlink_core::im::auth::LocalSession;
use bloodlink_core::im::chat::{ChatOptions, ChatSession, ChatSessionListener};
use bloodlink_core::im::config::ClientConfig;
use bloodlink_core::im::conversation::ConversationService;
use bloodlink_core::im::db::create_sqlite_pool_with_migration;
use bloodlink_core::im::message::{repository_for, Message, MessageStore};
use bloodlink_core::im::notification::{
    build_payload, match_request, BloodType, DonorCandidate, EmergencyRequest,
    LoggingPushTransport, NewBloodRequest, NotificationSettings, QuietHours,
    RequestAlertDispatcher, SqliteBloodRequestRepository, Urgency,
};
use bloodlink_core::im::profile::{Profile, Role, SqliteProfileDirectory};
use bloodlink_core::im::realtime::{transport_for, FeedState, LocalChangeFeed, ReconnectPolicy};
use bloodlink_core::login_async;
use chrono::{Local, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// BloodLink CLI
#[derive(Parser, Debug)]
#[command(name = "bloodlink-cli")]
#[command(about = "BloodLink CLI - 演示聊天与献血通知匹配", long_about = None)]
struct Args {
    /// 日志级别（默认: info,bloodlink_core=debug）
    #[arg(long, default_value = "info,bloodlink_core=debug")]
    log_level: String,

    /// 同时把日志写入文件
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 两个用户的端到端聊天演示（默认内存数据库）
    ChatDemo {
        /// SQLite 数据库 URL，缺省时读取 BLOODLINK_DB_URL，再缺省使用内存数据库
        #[arg(long)]
        db_url: Option<String>,
    },
    /// 发布一条紧急请求，演示提醒分发（内存数据库）
    AlertDemo {
        /// 需要的血型
        #[arg(long, default_value = "O-")]
        blood_type: String,
        /// 医院
        #[arg(long, default_value = "Springfield General Hospital")]
        hospital: String,
    },
    /// 对一条血液请求计算需要通知的献血者
    Match {
        /// 需要的血型，如 O-
        #[arg(long)]
        blood_type: String,
        /// 请求地点
        #[arg(long)]
        location: String,
        /// 紧急请求
        #[arg(long)]
        emergency: bool,
        /// 评估时间 HH:MM（默认当前本地时间）
        #[arg(long)]
        at: Option<String>,
        /// 献血者 JSON 文件：[{ "profile": {...}, "settings": {...} }, ...]
        #[arg(long)]
        donors: PathBuf,
    },
    /// 使用邮箱密码登录托管后端（BLOODLINK_REST_URL / BLOODLINK_ANON_KEY）
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
}

/// 初始化日志（输出到 stdout，可选同时输出到文件）
fn init_logger(log_level: &str, log_file: Option<&Path>) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("无法创建日志文件 {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(false)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file {
        info!("[CLI] 📝 日志已同时输出到控制台和文件: {}", path.display());
    }
    Ok(())
}

/// 打印聊天会话事件
struct CliChatListener {
    owner: String,
}

#[async_trait::async_trait]
impl ChatSessionListener for CliChatListener {
    async fn on_transcript_changed(&self, messages: Vec<Message>) {
        if let Some(last) = messages.last() {
            info!(
                "[CLI/Chat:{}] 📨 共 {} 条，最新: {} -> {}: {}",
                self.owner,
                messages.len(),
                last.sender_id,
                last.receiver_id,
                last.body
            );
        }
    }

    async fn on_feed_state_changed(&self, state: FeedState) {
        info!("[CLI/Chat:{}] 🔗 订阅状态: {:?}", self.owner, state);
    }
}

fn demo_profile(id: &str, name: &str, role: Role, blood_type: BloodType) -> Profile {
    Profile {
        id: id.to_string(),
        full_name: name.to_string(),
        phone: "555-0100".to_string(),
        role,
        blood_type: Some(blood_type),
        city: "Springfield".to_string(),
        is_verified: true,
        is_available: true,
    }
}

async fn run_chat_demo(db_url: Option<String>) -> Result<()> {
    let env_config = ClientConfig::from_env();
    let config = match db_url {
        Some(url) => env_config.with_db_url(url),
        None if std::env::var("BLOODLINK_DB_URL").is_ok() => env_config,
        None => env_config.with_db_url("sqlite::memory:"),
    };
    let pool = create_sqlite_pool_with_migration(&config).await?;
    let local_feed = Arc::new(LocalChangeFeed::new());
    let repo = repository_for(&config, pool.clone(), local_feed.clone(), None)?;
    let feed = transport_for(&config, local_feed, None)?;
    let directory = Arc::new(SqliteProfileDirectory::new(pool));

    let donor = demo_profile("donor-a", "Alice Donor", Role::Donor, BloodType::ONeg);
    let recipient = demo_profile("recipient-b", "Bob Recipient", Role::Recipient, BloodType::APos);
    for profile in [&donor, &recipient] {
        directory
            .upsert(&profile.id, profile, &NotificationSettings::app_defaults())
            .await?;
    }

    let alice = Arc::new(MessageStore::new(
        repo.clone(),
        Arc::new(LocalSession::signed_in(donor.id.as_str())),
    ));
    let bob = Arc::new(MessageStore::new(
        repo,
        Arc::new(LocalSession::signed_in(recipient.id.as_str())),
    ));

    info!("[CLI] 🩸 {} 发送求助消息", recipient.full_name);
    bob.append(&recipient.id, &donor.id, "Can you help?").await?;

    let chat = ChatSession::open_with(
        alice.clone(),
        feed.clone(),
        &donor.id,
        &recipient.id,
        ChatOptions::from(&config),
        Arc::new(CliChatListener {
            owner: donor.id.clone(),
        }),
    )
    .await?;
    chat.send("Yes, I can donate tomorrow morning.").await?;

    let conversations = ConversationService::new(alice, directory);
    let list = conversations.refresh().await?;

    info!("[CLI] 💬 聊天记录（共 {} 条）:", chat.transcript().await.len());
    for message in chat.transcript().await {
        info!("[CLI]   {} -> {}: {}", message.sender_id, message.receiver_id, message.body);
    }
    info!("[CLI] 📋 会话列表（共 {} 个）:", list.len());
    for summary in &list {
        info!(
            "[CLI]   - {} | 未读: {} | 最新: {}",
            summary.display_name, summary.unread_count, summary.last_message
        );
    }

    chat.close().await;
    Ok(())
}

async fn run_alert_demo(blood_type: &str, hospital: &str) -> Result<()> {
    let blood_type: BloodType = blood_type.parse()?;
    let config = ClientConfig::in_memory();
    let pool = create_sqlite_pool_with_migration(&config).await?;
    let feed = Arc::new(LocalChangeFeed::new());
    let directory = Arc::new(SqliteProfileDirectory::new(pool.clone()));
    let requests = Arc::new(SqliteBloodRequestRepository::with_change_feed(pool, feed.clone()));

    let mut sleepy = NotificationSettings::app_defaults();
    sleepy.emergency_requests = false;
    sleepy.quiet_hours = QuietHours::new(true, "00:00", "23:59");
    let donors = [
        (demo_profile("donor-a", "Alice Donor", Role::Donor, BloodType::ONeg), NotificationSettings::app_defaults()),
        (demo_profile("donor-c", "Carol Sleeper", Role::Donor, BloodType::APos), sleepy),
    ];
    for (profile, settings) in &donors {
        directory.upsert(&profile.id, profile, settings).await?;
    }
    let recipient = demo_profile("recipient-b", "Bob Recipient", Role::Recipient, blood_type);
    directory
        .upsert(&recipient.id, &recipient, &NotificationSettings::app_defaults())
        .await?;

    let dispatcher = Arc::new(
        RequestAlertDispatcher::new(feed, directory, Arc::new(LoggingPushTransport))
            .with_request_source(requests.clone())
            .with_reconnect(ReconnectPolicy::from(&config)),
    );
    let handle = dispatcher.start().await?;

    let form = EmergencyRequest {
        blood_type,
        hospital: hospital.to_string(),
        contact_number: "555-0199".to_string(),
        location: "Springfield".to_string(),
    }
    .into_new_request()?;
    let request = requests.create("recipient-b", form).await?;
    info!("[CLI] 🚨 已发布紧急请求 {}", request.id);

    // 等待后台分发完成
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    handle.abort();
    Ok(())
}

fn parse_at(at: Option<&str>) -> Result<NaiveTime> {
    match at {
        Some(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .with_context(|| format!("无效的时间: {}", raw)),
        None => Ok(Local::now().time()),
    }
}

/// 读取献血者文件；通知偏好宽松解析
fn load_donors(path: &Path) -> Result<Vec<DonorCandidate>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("读取献血者文件失败: {}", path.display()))?;
    let items: Vec<Value> = serde_json::from_str(&text).context("献血者文件不是 JSON 数组")?;
    items
        .into_iter()
        .map(|item| {
            let profile: Profile = serde_json::from_value(item["profile"].clone())
                .context("献血者资料格式错误")?;
            let settings = NotificationSettings::from_json_lenient(&item["settings"]);
            Ok(DonorCandidate { profile, settings })
        })
        .collect()
}

fn run_match(
    blood_type: &str,
    location: &str,
    emergency: bool,
    at: Option<&str>,
    donors: &Path,
) -> Result<()> {
    let blood_type: BloodType = blood_type.parse()?;
    let now = parse_at(at)?;
    let candidates = load_donors(donors)?;

    let request = NewBloodRequest {
        blood_type,
        location: location.to_string(),
        message: format!("{} blood needed", blood_type),
        urgency: if emergency { Urgency::Critical } else { Urgency::High },
        is_emergency: emergency,
    }
    .into_request("cli", Utc::now().timestamp_millis())?;

    let targets = match_request(&request, &candidates, now);
    info!(
        "[CLI] 🎯 {} 候选 {} 人，通知 {} 人（{}）",
        request.blood_type,
        candidates.len(),
        targets.len(),
        now.format("%H:%M")
    );

    let output: Vec<Value> = targets
        .iter()
        .map(|target| {
            serde_json::json!({
                "donor_id": target.donor_id,
                "reason": target.reason,
                "payload": build_payload(&request, target.reason),
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run_login(email: &str, password: &str) -> Result<()> {
    let config = ClientConfig::from_env();
    let (base_url, anon_key) = match (config.rest_base_url, config.anon_key) {
        (Some(url), Some(key)) => (url, key),
        _ => return Err(anyhow!("需要设置 BLOODLINK_REST_URL 和 BLOODLINK_ANON_KEY")),
    };
    info!("[CLI] 🔐 正在登录...");
    let login = login_async(&base_url, &anon_key, email, password)
        .await
        .map_err(|e| anyhow!("登录失败: {}", e))?;
    info!("[CLI] ✅ 登录成功！用户ID: {}", login.user_id);
    println!("{}", login.user_id);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level, args.log_file.as_deref())?;

    match args.command {
        Command::ChatDemo { db_url } => run_chat_demo(db_url).await,
        Command::AlertDemo {
            blood_type,
            hospital,
        } => run_alert_demo(&blood_type, &hospital).await,
        Command::Match {
            blood_type,
            location,
            emergency,
            at,
            donors,
        } => run_match(&blood_type, &location, emergency, at.as_deref(), &donors),
        Command::Login { email, password } => run_login(&email, &password).await,
    }
}
