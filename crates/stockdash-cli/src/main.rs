//! StockDash 실시간 동기화 CLI.
//!
//! # 사용 예시
//!
//! ```bash
//! # 모든 토픽의 실시간 메시지를 JSON line으로 출력
//! stockdash tail
//!
//! # 시세와 알림만 구독
//! stockdash tail -t price_update,notification
//!
//! # 스테이징 서버에 메시지 발행
//! stockdash publish -t notification -p '{"level":"info","title":"배포 완료"}' \
//!     --url ws://staging:8080/ws
//!
//! # 알려진 토픽 목록 보기
//! stockdash topics
//! ```

use clap::{Parser, Subcommand};
use tracing::error;

mod commands;

use stockdash_core::logging::init_logging_from_env;

#[derive(Parser)]
#[command(name = "stockdash")]
#[command(about = "StockDash realtime sync CLI - 대시보드 실시간 스트림 도구", long_about = None)]
#[command(version)]
struct Cli {
    /// 설정 파일 경로
    #[arg(short, long, default_value = "config/default.toml", global = true)]
    config: String,

    /// WebSocket URL 직접 지정 (설정 파일보다 우선)
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 실시간 메시지를 구독해서 JSON line으로 출력
    Tail {
        /// 구독할 토픽 (쉼표로 구분, 생략 시 전체)
        #[arg(short, long)]
        topics: Option<String>,
    },

    /// 메시지 한 건 발행
    Publish {
        /// 토픽 이름 (예: notification)
        #[arg(short, long)]
        topic: String,

        /// payload JSON (예: '{"title":"test"}')
        #[arg(short, long, default_value = "null")]
        payload: String,
    },

    /// 알려진 토픽 목록 보기
    Topics,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    if let Err(e) = init_logging_from_env() {
        eprintln!("로깅 초기화 실패: {}", e);
    }

    let cli = Cli::parse();
    let realtime = commands::load_realtime_config(&cli.config, cli.url.clone())?;

    match cli.command {
        Commands::Tail { topics } => {
            if let Err(e) = commands::tail::run(realtime, topics).await {
                error!("Tail failed: {}", e);
                return Err(e);
            }
        }

        Commands::Publish { topic, payload } => {
            if let Err(e) = commands::publish::run(realtime, &topic, &payload).await {
                error!("Publish failed: {}", e);
                return Err(e);
            }
        }

        Commands::Topics => {
            commands::topics::print_known_topics();
        }
    }

    Ok(())
}
