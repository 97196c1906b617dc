//! 실시간 메시지 envelope 및 payload 타입.
//!
//! 서버와 교환되는 모든 프레임은 네 개의 필드를 가진 JSON envelope입니다:
//!
//! ```json
//! {
//!   "type": "price_update",
//!   "payload": { "symbol": "7203", "price": 3100 },
//!   "timestamp": "2025-01-15T09:30:00.000Z",
//!   "id": "550e8400-e29b-41d4-a716-446655440000"
//! }
//! ```
//!
//! `type`은 구독/디스패치의 키가 되는 토픽입니다. payload 구조는 토픽에
//! 따라 다르며, 수신 경계에서 [`Envelope::decode`] 또는 [`Envelope::typed`]로
//! 검증합니다. 알 수 없는 `type`의 메시지도 해당 문자열 토픽의 구독자에게는
//! 그대로 전달됩니다.

use chrono::{SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{SyncError, SyncResult};

/// 메시지 토픽 (envelope의 `type` 필드).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// 실시간 가격 업데이트
    PriceUpdate,
    /// AI 분석 결과
    AiAnalysis,
    /// 시스템 메트릭
    SystemMetrics,
    /// 일반 알림
    Notification,
    /// 포트폴리오 업데이트
    PortfolioUpdate,
    /// 체결 내역
    TradeExecution,
    /// 백테스트 진행률
    BacktestProgress,
    /// 하트비트 ping
    Ping,
    /// 하트비트 pong
    Pong,
    /// 정의되지 않은 토픽 (해당 문자열 구독자에게 그대로 전달됨)
    Other(String),
}

impl Topic {
    /// 알려진 토픽 목록.
    pub const KNOWN: [Topic; 9] = [
        Topic::PriceUpdate,
        Topic::AiAnalysis,
        Topic::SystemMetrics,
        Topic::Notification,
        Topic::PortfolioUpdate,
        Topic::TradeExecution,
        Topic::BacktestProgress,
        Topic::Ping,
        Topic::Pong,
    ];

    /// 와이어 이름에서 토픽 파싱.
    ///
    /// 알 수 없는 이름은 [`Topic::Other`]로 보존됩니다.
    pub fn from_name(name: &str) -> Self {
        match name {
            "price_update" => Topic::PriceUpdate,
            "ai_analysis" => Topic::AiAnalysis,
            "system_metrics" => Topic::SystemMetrics,
            "notification" => Topic::Notification,
            "portfolio_update" => Topic::PortfolioUpdate,
            "trade_execution" => Topic::TradeExecution,
            "backtest_progress" => Topic::BacktestProgress,
            "ping" => Topic::Ping,
            "pong" => Topic::Pong,
            other => Topic::Other(other.to_string()),
        }
    }

    /// 토픽의 와이어 이름.
    pub fn name(&self) -> &str {
        match self {
            Topic::PriceUpdate => "price_update",
            Topic::AiAnalysis => "ai_analysis",
            Topic::SystemMetrics => "system_metrics",
            Topic::Notification => "notification",
            Topic::PortfolioUpdate => "portfolio_update",
            Topic::TradeExecution => "trade_execution",
            Topic::BacktestProgress => "backtest_progress",
            Topic::Ping => "ping",
            Topic::Pong => "pong",
            Topic::Other(name) => name,
        }
    }

    /// 하트비트 토픽인지 확인.
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Topic::Ping | Topic::Pong)
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Topic::from_name(&name))
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 실시간 메시지 envelope.
///
/// 송신 시에는 [`Envelope::new`]가 네 필드를 모두 채웁니다. 수신 시
/// `timestamp`/`id`가 빠진 프레임은 로컬 값으로 방어적으로 보충합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// 토픽 (디스패치 키)
    #[serde(rename = "type")]
    pub topic: Topic,
    /// 토픽별 payload
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    /// 생성 시각 (RFC 3339)
    #[serde(default = "now_rfc3339")]
    pub timestamp: String,
    /// 로컬 고유 ID (중복 제거/추적용, 전역 고유성은 보장하지 않음)
    #[serde(default = "new_message_id")]
    pub id: String,
}

impl Envelope {
    /// 새 envelope 생성. timestamp와 id는 자동으로 채워집니다.
    pub fn new(topic: Topic, payload: Value) -> Self {
        Self {
            topic,
            payload,
            timestamp: now_rfc3339(),
            id: new_message_id(),
        }
    }

    /// 하트비트 ping envelope 생성.
    pub fn ping() -> Self {
        Self::new(Topic::Ping, Value::Null)
    }

    /// JSON 문자열에서 파싱.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        serde_json::from_str(json).map_err(SyncError::from)
    }

    /// JSON 문자열로 직렬화.
    pub fn to_json(&self) -> SyncResult<String> {
        serde_json::to_string(self).map_err(SyncError::from)
    }

    /// payload를 구체 타입으로 디코딩.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> SyncResult<T> {
        serde_json::from_value(self.payload.clone()).map_err(SyncError::from)
    }

    /// 알려진 토픽의 payload를 tagged union으로 디코딩.
    pub fn typed(&self) -> SyncResult<TypedPayload> {
        let mut value = serde_json::Map::new();
        value.insert("type".to_string(), Value::String(self.topic.name().to_string()));
        if !self.payload.is_null() {
            value.insert("payload".to_string(), self.payload.clone());
        }
        serde_json::from_value(Value::Object(value)).map_err(SyncError::from)
    }
}

/// 알려진 토픽의 payload tagged union.
///
/// 수신 경계에서의 검증용입니다. 디스패치 자체는 raw [`Envelope`]로
/// 이루어지므로 알 수 없는 토픽도 구독자에게 전달될 수 있습니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum TypedPayload {
    /// 가격 업데이트
    PriceUpdate(PriceUpdateData),
    /// AI 분석 결과
    AiAnalysis(AiAnalysisData),
    /// 시스템 메트릭
    SystemMetrics(SystemMetricsData),
    /// 알림
    Notification(NotificationData),
    /// 포트폴리오 업데이트
    PortfolioUpdate(PortfolioUpdateData),
    /// 체결 내역
    TradeExecution(TradeExecutionData),
    /// 백테스트 진행률
    BacktestProgress(BacktestProgressData),
    /// 하트비트 ping
    Ping,
    /// 하트비트 pong
    Pong,
}

/// 가격 업데이트 데이터.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceUpdateData {
    /// 종목 코드
    pub symbol: String,
    /// 현재가
    pub price: Decimal,
    /// 전일 대비
    #[serde(default)]
    pub change: Decimal,
    /// 등락률 (%)
    #[serde(default)]
    pub change_rate: Decimal,
    /// 거래량
    #[serde(default)]
    pub volume: i64,
}

/// AI 분석 결과 데이터.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiAnalysisData {
    /// 종목 코드
    pub symbol: String,
    /// 판단 (buy, sell, hold)
    pub decision: String,
    /// 신뢰도 (0.0 ~ 1.0)
    pub confidence: f64,
    /// 판단 근거
    #[serde(default)]
    pub reason: String,
}

/// 시스템 메트릭 데이터.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetricsData {
    /// CPU 사용률 (%)
    pub cpu_usage: f64,
    /// 메모리 사용률 (%)
    pub memory_usage: f64,
    /// 활성 연결 수
    #[serde(default)]
    pub active_connections: u32,
    /// API 응답 지연 (밀리초)
    #[serde(default)]
    pub api_latency_ms: u64,
}

/// 알림 데이터.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationData {
    /// 알림 수준 (info, warning, error)
    #[serde(default)]
    pub level: String,
    /// 제목
    pub title: String,
    /// 본문
    #[serde(default)]
    pub message: String,
}

/// 포트폴리오 업데이트 데이터.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioUpdateData {
    /// 총 평가액
    pub total_value: Decimal,
    /// 현금 잔고
    #[serde(default)]
    pub cash: Decimal,
    /// 보유 종목 목록
    #[serde(default)]
    pub positions: Vec<PortfolioPosition>,
}

/// 보유 종목.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioPosition {
    /// 종목 코드
    pub symbol: String,
    /// 보유 수량
    pub quantity: Decimal,
    /// 평균 매수가
    pub avg_price: Decimal,
    /// 현재가
    pub current_price: Decimal,
}

/// 체결 내역 데이터.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeExecutionData {
    /// 주문 ID
    pub order_id: String,
    /// 종목 코드
    pub symbol: String,
    /// 매수/매도
    pub side: String,
    /// 체결 가격
    pub price: Decimal,
    /// 체결 수량
    pub quantity: Decimal,
}

/// 백테스트 진행률 데이터.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestProgressData {
    /// 작업 ID
    pub job_id: String,
    /// 진행률 (0.0 ~ 100.0)
    pub progress: f64,
    /// 현재 단계
    #[serde(default)]
    pub stage: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_topic_roundtrip() {
        for topic in Topic::KNOWN {
            assert_eq!(Topic::from_name(topic.name()), topic);
        }
    }

    #[test]
    fn test_topic_unknown_preserved() {
        let topic = Topic::from_name("fx_rate");
        assert_eq!(topic, Topic::Other("fx_rate".to_string()));
        assert_eq!(topic.name(), "fx_rate");
    }

    #[test]
    fn test_envelope_new_fills_all_fields() {
        let env = Envelope::new(Topic::Ping, Value::Null);
        assert_eq!(env.topic, Topic::Ping);
        assert!(!env.timestamp.is_empty());
        assert!(!env.id.is_empty());
    }

    #[test]
    fn test_envelope_parse_price_update() {
        let json = r#"{
            "type": "price_update",
            "payload": {"symbol": "7203", "price": 3100},
            "timestamp": "2025-01-15T09:30:00.000Z",
            "id": "1"
        }"#;

        let env = Envelope::from_json(json).unwrap();
        assert_eq!(env.topic, Topic::PriceUpdate);
        assert_eq!(env.id, "1");

        let data: PriceUpdateData = env.decode().unwrap();
        assert_eq!(data.symbol, "7203");
        assert_eq!(data.price, dec!(3100));
        assert_eq!(data.volume, 0);
    }

    #[test]
    fn test_envelope_defensive_defaults() {
        // timestamp/id가 없는 프레임도 파싱되어야 함
        let json = r#"{"type": "pong"}"#;
        let env = Envelope::from_json(json).unwrap();

        assert_eq!(env.topic, Topic::Pong);
        assert!(env.payload.is_null());
        assert!(!env.timestamp.is_empty());
        assert!(!env.id.is_empty());
    }

    #[test]
    fn test_envelope_unknown_type_parses() {
        let json = r#"{"type": "fx_rate", "payload": {"pair": "USD/JPY"}}"#;
        let env = Envelope::from_json(json).unwrap();
        assert_eq!(env.topic, Topic::Other("fx_rate".to_string()));
    }

    #[test]
    fn test_ping_serialization_omits_payload() {
        let json = Envelope::ping().to_json().unwrap();
        assert!(json.contains("\"type\":\"ping\""));
        assert!(!json.contains("payload"));
    }

    #[test]
    fn test_typed_payload_decode() {
        let env = Envelope::new(
            Topic::PriceUpdate,
            serde_json::json!({"symbol": "7203", "price": 3100}),
        );

        match env.typed().unwrap() {
            TypedPayload::PriceUpdate(data) => {
                assert_eq!(data.symbol, "7203");
                assert_eq!(data.price, dec!(3100));
            }
            other => panic!("Expected PriceUpdate, got {:?}", other),
        }
    }

    #[test]
    fn test_typed_payload_heartbeat() {
        let env = Envelope::from_json(r#"{"type": "pong"}"#).unwrap();
        assert!(matches!(env.typed().unwrap(), TypedPayload::Pong));
    }
}
