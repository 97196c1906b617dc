//! 설정 관리.
//!
//! 이 모듈은 실시간 동기화 계층의 설정을 정의하고 관리합니다.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 실행 환경.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// 개발 환경
    #[default]
    Development,
    /// 운영 환경
    Production,
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(format!("Unknown environment: {}", s)),
        }
    }
}

/// 애플리케이션 설정.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// 실시간 동기화 설정
    #[serde(default)]
    pub realtime: RealtimeConfig,
    /// 로깅 설정
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// 파일과 환경 변수에서 설정을 로드합니다.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            // 파일에서 로드
            .add_source(config::File::from(path.as_ref()))
            // 환경 변수로 오버라이드
            .add_source(
                config::Environment::with_prefix("STOCKDASH")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// 기본 경로에서 설정을 로드합니다.
    pub fn load_default() -> Result<Self, config::ConfigError> {
        Self::load("config/default.toml")
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// 실시간 동기화 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RealtimeConfig {
    /// 실행 환경 (WebSocket URL 유도에 사용)
    #[serde(default)]
    pub environment: Environment,
    /// WebSocket URL 직접 지정 (environment 유도보다 우선)
    #[serde(default)]
    pub ws_url: Option<String>,
    /// 최대 자동 재연결 시도 횟수
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// 재연결 초기 대기 시간 (밀리초)
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    /// 재연결 최대 대기 시간 (밀리초)
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    /// 하트비트 ping 간격 (밀리초)
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// 연결 타임아웃 (밀리초)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// 시작 시 자동 연결 여부 (마스터 탭에만 적용)
    #[serde(default = "default_auto_connect")]
    pub auto_connect: bool,
    /// 송신 채널 버퍼 크기
    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,
}

fn default_max_reconnect_attempts() -> u32 {
    10
}
fn default_reconnect_base_ms() -> u64 {
    1_000
}
fn default_reconnect_max_ms() -> u64 {
    30_000
}
fn default_heartbeat_interval_ms() -> u64 {
    30_000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_auto_connect() -> bool {
    true
}
fn default_send_buffer() -> usize {
    100
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            ws_url: None,
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            auto_connect: default_auto_connect(),
            send_buffer: default_send_buffer(),
        }
    }
}

impl RealtimeConfig {
    /// 사용할 WebSocket URL.
    ///
    /// `ws_url`이 지정되어 있으면 그대로 사용하고, 아니면 환경에서 유도합니다.
    pub fn websocket_url(&self) -> String {
        if let Some(url) = &self.ws_url {
            return url.clone();
        }

        match self.environment {
            Environment::Development => "ws://127.0.0.1:8080/ws".to_string(),
            Environment::Production => "wss://stream.stockdash.app/ws".to_string(),
        }
    }

    /// 하트비트 간격을 Duration으로 반환합니다.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// 연결 타임아웃을 Duration으로 반환합니다.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// 지수 백오프를 적용한 재연결 대기 시간을 계산합니다.
    ///
    /// `min(base * 2^attempt, cap)`
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = self
            .reconnect_base_ms
            .saturating_mul(factor)
            .min(self.reconnect_max_ms);
        Duration::from_millis(delay)
    }

    /// 추가 재연결을 시도해야 하는지 확인합니다.
    pub fn should_reconnect(&self, attempt: u32) -> bool {
        attempt < self.max_reconnect_attempts
    }
}
