//! Foyer Notify CLI
//!
//! 家庭 hub 的通知引擎进程：定时轮询协作方、分发通知、管理订阅 onboarding

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use foyer_notify::{
    Category, DispatchResult, Engine, EngineBuilder, EngineConfig, HttpDomainQueries,
    JsonFileRepository, Notification, Scheduler, SchedulerConfig,
};

#[derive(Parser)]
#[command(name = "foyerd")]
#[command(about = "Foyer Notify - 通知分发与限流引擎")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 运行定时调度循环（Ctrl-C 优雅停止）
    Serve {
        /// 每日摘要 tick 的本地小时（0-23）
        #[arg(long, default_value_t = 18)]
        digest_hour: u8,
    },
    /// 执行一次 tick 并打印全部分发结果
    Tick {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 执行一次每日摘要 tick
    Digest {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 发送一条测试通知
    SendTest {
        /// 接收者 ID
        recipient: String,
        /// 标题
        #[arg(long, default_value = "Test notification")]
        title: String,
        /// 正文
        #[arg(long, default_value = "Hello from foyerd")]
        body: String,
    },
    /// 打印 topic push 渠道的订阅 onboarding URL
    SubscribeUrl,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env().context("failed to load engine configuration")?;

    match cli.command {
        Commands::Serve { digest_hour } => serve(config, digest_hour).await,
        Commands::Tick { json } => {
            let (engine, scheduler) = build_scheduler(config)?;
            let results = scheduler.run_tick().await;
            print_results(&results, json);
            drop(engine);
            Ok(())
        }
        Commands::Digest { json } => {
            let (engine, scheduler) = build_scheduler(config)?;
            let results = scheduler.run_digest_tick().await;
            print_results(&results, json);
            drop(engine);
            Ok(())
        }
        Commands::SendTest {
            recipient,
            title,
            body,
        } => {
            let engine = build_engine(config)?;
            // 去重键带上通知 id，连续测试不会互相去重
            let mut draft =
                Notification::draft(&recipient, Category::ActivityReminder, title, body, "");
            draft.dedup_key = format!("{recipient}:test:{}", draft.id);
            let result = engine.dispatcher.dispatch(draft).await;
            print_results(std::slice::from_ref(&result), false);
            if result.success {
                Ok(())
            } else {
                bail!("dispatch failed: {}", result.message)
            }
        }
        Commands::SubscribeUrl => {
            let engine = build_engine(config)?;
            match &engine.topic {
                Some(topic) => {
                    println!("subscribe: {}", topic.subscribe_url());
                    println!("web app:   {}", topic.web_app_url());
                    println!("qr code:   {}", topic.qr_code_url());
                    Ok(())
                }
                None => bail!("topic push is not configured (set FOYER_TOPIC_URL and FOYER_TOPIC)"),
            }
        }
    }
}

fn build_engine(config: EngineConfig) -> Result<Engine> {
    let repository = JsonFileRepository::new(&config.data_dir)
        .with_context(|| format!("failed to open data dir {}", config.data_dir.display()))?;
    let engine = EngineBuilder::new(config)
        .with_repository(Arc::new(repository))
        .build()?;
    Ok(engine)
}

fn build_scheduler(config: EngineConfig) -> Result<(Engine, Arc<Scheduler>)> {
    let Some(hub_url) = config.hub_url.clone() else {
        bail!("FOYER_HUB_URL must be set to poll domain services");
    };
    let scheduler_config = SchedulerConfig {
        tick_interval: config.tick_interval,
        concurrency: config.dispatch_concurrency,
    };
    let engine = build_engine(config)?;
    let queries = Arc::new(HttpDomainQueries::new(hub_url)?);
    let scheduler = Arc::new(Scheduler::new(
        engine.dispatcher.clone(),
        engine.prefs.clone(),
        queries,
        scheduler_config,
    ));
    Ok((engine, scheduler))
}

async fn serve(config: EngineConfig, digest_hour: u8) -> Result<()> {
    let (engine, scheduler) = build_scheduler(config)?;
    let handle = scheduler.spawn()?;
    info!("foyerd serving, press Ctrl-C to stop");

    // 每日摘要：每小时检查一次，到点且当天未发送则执行 digest tick
    let digest_scheduler = scheduler.clone();
    let digest_task = tokio::spawn(async move {
        use chrono::{Local, Timelike};
        let mut last_digest_date: Option<chrono::NaiveDate> = None;
        let mut check = tokio::time::interval(Duration::from_secs(3600));
        check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            check.tick().await;
            let now = Local::now();
            if now.hour() as u8 == digest_hour && last_digest_date != Some(now.date_naive()) {
                let results = digest_scheduler.run_digest_tick().await;
                info!(count = results.len(), "Daily digest tick complete");
                last_digest_date = Some(now.date_naive());
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested, stopping scheduler");

    handle.stop();
    digest_task.abort();
    handle.stopped().await;
    drop(engine);
    info!("foyerd stopped");
    Ok(())
}

fn print_results(results: &[DispatchResult], json: bool) {
    if json {
        match serde_json::to_string_pretty(results) {
            Ok(text) => println!("{text}"),
            Err(e) => warn!(error = %e, "Failed to serialize results"),
        }
        return;
    }

    if results.is_empty() {
        println!("nothing to dispatch");
        return;
    }
    for result in results {
        let status = if result.success {
            "sent"
        } else if result.is_suppressed() {
            "suppressed"
        } else {
            "failed"
        };
        println!(
            "[{status}] {} via {} {}",
            result.notification_id,
            result.channel,
            if result.message.is_empty() {
                String::new()
            } else {
                format!("({})", result.message)
            }
        );
    }
}
