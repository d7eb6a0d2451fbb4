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

pub const MEXC_WS_URL: &str = "wss://contract.mexc.com/edge";

pub struct MexcProtocol;

impl ExchangeProtocol for MexcProtocol {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Mexc
    }

    fn ws_url(&self) -> Result<url::Url, SocketError> {
        Ok(url::Url::parse(MEXC_WS_URL)?)
    }

    fn subscribe_messages(&self, symbols: &[Symbol]) -> Vec<WsMessage> {
        symbols
            .iter()
            .map(|symbol| {
                let native = symbol_translation::to_native(ExchangeId::Mexc, symbol);
                WsMessage::text(
                    serde_json::json!({"method": "sub.funding.rate", "param": {"symbol": native}}).to_string(),
                )
            })
            .collect()
    }

    fn unsubscribe_messages(&self, symbols: &[Symbol]) -> Vec<WsMessage> {
        symbols
            .iter()
            .map(|symbol| {
                let native = symbol_translation::to_native(ExchangeId::Mexc, symbol);
                WsMessage::text(
                    serde_json::json!({"method": "unsub.funding.rate", "param": {"symbol": native}}).to_string(),
                )
            })
            .collect()
    }

    fn parse_text(&self, text: &str) -> Result<Vec<ParsedEvent>, SocketError> {
        let message: MexcMessage = serde_json::from_str(text).map_err(|error| SocketError::Deserialise {
            error,
            payload: text.to_owned(),
        })?;

        if message.channel != "push.funding.rate" {
            return Ok(vec![]);
        }
        let Some(data) = message.data else {
            return Ok(vec![]);
        };

        let symbol = symbol_translation::to_canonical(ExchangeId::Mexc, &data.symbol)
            .map_err(|error| SocketError::Exchange(error.to_string()))?;

        Ok(vec![ParsedEvent::FundingRate(FundingRateReceived {
            exchange: ExchangeId::Mexc,
            symbol,
            funding_rate: Some(data.funding_rate),
            next_funding_time: data
                .next_settle_time
                .map(millis_to_datetime)
                .unwrap_or_else(Utc::now),
            next_funding_rate: None,
            mark_price: None,
            source: FundingRateReceived::SOURCE_WEBSOCKET,
            received_at: Utc::now(),
        })])
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

#[derive(Debug, Deserialize)]
struct MexcMessage {
    channel: String,
    data: Option<MexcFundingRateData>,
}

#[derive(Debug, Deserialize)]
struct MexcFundingRateData {
    symbol: String,
    #[serde(rename = "fundingRate")]
    funding_rate: Decimal,
    #[serde(rename = "nextSettleTime")]
    next_settle_time: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_funding_rate_push() {
        let protocol = MexcProtocol;
        let text = r#"{"channel":"push.funding.rate","data":{"symbol":"BTC/USDT:USDT","fundingRate":0.0001,"nextSettleTime":1700028800000}}"#;

        let events = protocol.parse_text(text).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            ParsedEvent::FundingRate(received) => {
                assert_eq!(received.symbol.as_str(), "BTCUSDT");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_non_funding_rate_channel_is_skipped() {
        let protocol = MexcProtocol;
        let text = r#"{"channel":"push.ticker","data":{"symbol":"BTC/USDT:USDT"}}"#;
        assert_eq!(protocol.parse_text(text).unwrap(), vec![]);
    }
}
