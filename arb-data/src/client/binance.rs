use crate::client::generic::{ExchangeProtocol, ParsedEvent};
use crate::client::symbol_translation;
use crate::model::FundingRateReceived;
use arb_instrument::exchange::ExchangeId;
use arb_instrument::symbol::Symbol;
use arb_integration::error::SocketError;
use arb_integration::protocol::websocket::WsMessage;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

pub const BINANCE_WS_BASE: &str = "wss://fstream.binance.com/stream";

pub struct BinanceProtocol;

impl ExchangeProtocol for BinanceProtocol {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Binance
    }

    fn ws_url(&self) -> Result<url::Url, SocketError> {
        Ok(url::Url::parse(BINANCE_WS_BASE)?)
    }

    fn subscribe_messages(&self, symbols: &[Symbol]) -> Vec<WsMessage> {
        let params: Vec<String> = symbols
            .iter()
            .map(|symbol| format!("{}@markPrice@1s", symbol_translation::to_native(ExchangeId::Binance, symbol).to_lowercase()))
            .collect();

        vec![WsMessage::text(
            serde_json::json!({"method": "SUBSCRIBE", "params": params, "id": 1}).to_string(),
        )]
    }

    fn unsubscribe_messages(&self, symbols: &[Symbol]) -> Vec<WsMessage> {
        let params: Vec<String> = symbols
            .iter()
            .map(|symbol| format!("{}@markPrice@1s", symbol_translation::to_native(ExchangeId::Binance, symbol).to_lowercase()))
            .collect();

        vec![WsMessage::text(
            serde_json::json!({"method": "UNSUBSCRIBE", "params": params, "id": 1}).to_string(),
        )]
    }

    fn parse_text(&self, text: &str) -> Result<Vec<ParsedEvent>, SocketError> {
        let envelope: BinanceEnvelope = serde_json::from_str(text).map_err(|error| SocketError::Deserialise {
            error,
            payload: text.to_owned(),
        })?;

        let Some(data) = envelope.data else {
            return Ok(vec![]);
        };
        if data.event_type.as_deref() != Some("markPriceUpdate") {
            return Ok(vec![]);
        }

        let symbol = symbol_translation::to_canonical(ExchangeId::Binance, &data.symbol)
            .map_err(|error| SocketError::Exchange(error.to_string()))?;

        let mark_price = parse_decimal("p", &data.mark_price)?;
        let funding_rate = data
            .funding_rate
            .as_deref()
            .map(|value| parse_decimal("r", value))
            .transpose()?;
        let next_funding_time = data
            .next_funding_time
            .map(millis_to_datetime)
            .unwrap_or_else(Utc::now);

        Ok(vec![
            ParsedEvent::MarkPrice {
                symbol: symbol.clone(),
                price: mark_price,
            },
            ParsedEvent::FundingRate(FundingRateReceived {
                exchange: ExchangeId::Binance,
                symbol,
                funding_rate,
                next_funding_time,
                next_funding_rate: None,
                mark_price: Some(mark_price),
                source: FundingRateReceived::SOURCE_WEBSOCKET,
                received_at: Utc::now(),
            }),
        ])
    }

    fn server_timestamp_ms(&self, text: &str) -> Option<i64> {
        let envelope: BinanceEnvelope = serde_json::from_str(text).ok()?;
        envelope.data?.event_time
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal, SocketError> {
    Decimal::from_str(value).map_err(|error| SocketError::Exchange(format!("invalid {field} '{value}': {error}")))
}

#[derive(Debug, Deserialize)]
struct BinanceEnvelope {
    data: Option<BinanceMarkPriceData>,
}

#[derive(Debug, Deserialize)]
struct BinanceMarkPriceData {
    #[serde(rename = "e")]
    event_type: Option<String>,
    #[serde(rename = "E")]
    event_time: Option<i64>,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    mark_price: String,
    #[serde(rename = "r")]
    funding_rate: Option<String>,
    #[serde(rename = "T")]
    next_funding_time: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mark_price_update() {
        let protocol = BinanceProtocol;
        let text = r#"{"stream":"btcusdt@markPrice@1s","data":{"e":"markPriceUpdate","E":1700000000000,"s":"BTCUSDT","p":"60000.5","r":"0.0001","T":1700028800000}}"#;

        let events = protocol.parse_text(text).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            ParsedEvent::MarkPrice {
                symbol: Symbol::new("BTCUSDT").unwrap(),
                price: Decimal::from_str("60000.5").unwrap(),
            }
        );
        match &events[1] {
            ParsedEvent::FundingRate(received) => {
                assert_eq!(received.funding_rate, Some(Decimal::from_str("0.0001").unwrap()));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_server_timestamp_extraction() {
        let protocol = BinanceProtocol;
        let text = r#"{"data":{"e":"markPriceUpdate","E":1700000000000,"s":"BTCUSDT","p":"1","T":1}}"#;
        assert_eq!(protocol.server_timestamp_ms(text), Some(1700000000000));
    }

    #[test]
    fn test_non_mark_price_events_are_skipped() {
        let protocol = BinanceProtocol;
        let text = r#"{"data":{"e":"someOtherEvent","s":"BTCUSDT","p":"1"}}"#;
        assert_eq!(protocol.parse_text(text).unwrap(), vec![]);
    }
}
