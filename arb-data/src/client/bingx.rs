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

pub const BINGX_WS_URL: &str = "wss://open-api-swap.bingx.com/swap-market";

/// BingX frames most of its WebSocket payloads as gzip (component design §4.1/§9); the magic-byte
/// check and decompression happen generically in [`crate::client::generic`] before this protocol
/// ever sees the text, so there is nothing gzip-specific here.
pub struct BingxProtocol;

impl ExchangeProtocol for BingxProtocol {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Bingx
    }

    fn ws_url(&self) -> Result<url::Url, SocketError> {
        Ok(url::Url::parse(BINGX_WS_URL)?)
    }

    fn subscribe_messages(&self, symbols: &[Symbol]) -> Vec<WsMessage> {
        symbols
            .iter()
            .map(|symbol| {
                let native = symbol_translation::to_native(ExchangeId::Bingx, symbol);
                WsMessage::text(
                    serde_json::json!({
                        "id": uuid_like(symbol),
                        "reqType": "sub",
                        "dataType": format!("{native}@fundingRate"),
                    })
                    .to_string(),
                )
            })
            .collect()
    }

    fn unsubscribe_messages(&self, symbols: &[Symbol]) -> Vec<WsMessage> {
        symbols
            .iter()
            .map(|symbol| {
                let native = symbol_translation::to_native(ExchangeId::Bingx, symbol);
                WsMessage::text(
                    serde_json::json!({
                        "id": uuid_like(symbol),
                        "reqType": "unsub",
                        "dataType": format!("{native}@fundingRate"),
                    })
                    .to_string(),
                )
            })
            .collect()
    }

    fn parse_text(&self, text: &str) -> Result<Vec<ParsedEvent>, SocketError> {
        if text == "Ping" {
            return Ok(vec![]);
        }

        let message: BingxMessage = serde_json::from_str(text).map_err(|error| SocketError::Deserialise {
            error,
            payload: text.to_owned(),
        })?;

        if !message.data_type.ends_with("@fundingRate") {
            return Ok(vec![]);
        }
        let Some(data) = message.data else {
            return Ok(vec![]);
        };

        let symbol = symbol_translation::to_canonical(ExchangeId::Bingx, &data.symbol)
            .map_err(|error| SocketError::Exchange(error.to_string()))?;

        let mut events = Vec::with_capacity(2);
        let mark_price = data
            .mark_price
            .as_deref()
            .map(|value| parse_decimal("markPrice", value))
            .transpose()?;
        if let Some(price) = mark_price {
            events.push(ParsedEvent::MarkPrice {
                symbol: symbol.clone(),
                price,
            });
        }

        events.push(ParsedEvent::FundingRate(FundingRateReceived {
            exchange: ExchangeId::Bingx,
            symbol,
            funding_rate: Some(parse_decimal("fundingRate", &data.funding_rate)?),
            next_funding_time: data.funding_time.map(millis_to_datetime).unwrap_or_else(Utc::now),
            next_funding_rate: None,
            mark_price,
            source: FundingRateReceived::SOURCE_WEBSOCKET,
            received_at: Utc::now(),
        }));

        Ok(events)
    }
}

fn uuid_like(symbol: &Symbol) -> String {
    format!("sub-{}-{}", symbol.as_str(), Utc::now().timestamp_millis())
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal, SocketError> {
    Decimal::from_str(value).map_err(|error| SocketError::Exchange(format!("invalid {field} '{value}': {error}")))
}

#[derive(Debug, Deserialize)]
struct BingxMessage {
    #[serde(rename = "dataType")]
    data_type: String,
    data: Option<BingxFundingRateData>,
}

#[derive(Debug, Deserialize)]
struct BingxFundingRateData {
    symbol: String,
    #[serde(rename = "fundingRate")]
    funding_rate: String,
    #[serde(rename = "fundingTime")]
    funding_time: Option<i64>,
    #[serde(rename = "markPrice")]
    mark_price: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_funding_rate_payload() {
        let protocol = BingxProtocol;
        let text = r#"{"dataType":"BTC-USDT@fundingRate","data":{"symbol":"BTC-USDT","fundingRate":"0.0001","fundingTime":1700028800000,"markPrice":"60000.3"}}"#;

        let events = protocol.parse_text(text).unwrap();
        assert_eq!(events.len(), 2);
        match &events[1] {
            ParsedEvent::FundingRate(received) => {
                assert_eq!(received.symbol.as_str(), "BTCUSDT");
                assert_eq!(received.exchange, ExchangeId::Bingx);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_ping_text_is_ignored() {
        let protocol = BingxProtocol;
        assert_eq!(protocol.parse_text("Ping").unwrap(), vec![]);
    }

    #[test]
    fn test_non_funding_rate_data_type_is_skipped() {
        let protocol = BingxProtocol;
        let text = r#"{"dataType":"BTC-USDT@depth","data":{"symbol":"BTC-USDT"}}"#;
        assert_eq!(protocol.parse_text(text).unwrap(), vec![]);
    }
}
