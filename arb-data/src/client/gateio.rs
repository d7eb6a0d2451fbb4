use crate::client::generic::{ExchangeProtocol, ParsedEvent};
use crate::client::symbol_translation;
use crate::model::FundingRateReceived;
use arb_instrument::exchange::ExchangeId;
use arb_instrument::symbol::Symbol;
use arb_integration::error::SocketError;
use arb_integration::protocol::websocket::WsMessage;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

pub const GATEIO_WS_URL: &str = "wss://fx-ws.gateio.ws/v4/ws/usdt";

const CHANNEL: &str = "futures.tickers";

pub struct GateioProtocol;

impl ExchangeProtocol for GateioProtocol {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Gateio
    }

    fn ws_url(&self) -> Result<url::Url, SocketError> {
        Ok(url::Url::parse(GATEIO_WS_URL)?)
    }

    fn subscribe_messages(&self, symbols: &[Symbol]) -> Vec<WsMessage> {
        let payload: Vec<String> = symbols
            .iter()
            .map(|symbol| symbol_translation::to_native(ExchangeId::Gateio, symbol))
            .collect();

        vec![WsMessage::text(
            serde_json::json!({
                "time": Utc::now().timestamp(),
                "channel": CHANNEL,
                "event": "subscribe",
                "payload": payload,
            })
            .to_string(),
        )]
    }

    fn unsubscribe_messages(&self, symbols: &[Symbol]) -> Vec<WsMessage> {
        let payload: Vec<String> = symbols
            .iter()
            .map(|symbol| symbol_translation::to_native(ExchangeId::Gateio, symbol))
            .collect();

        vec![WsMessage::text(
            serde_json::json!({
                "time": Utc::now().timestamp(),
                "channel": CHANNEL,
                "event": "unsubscribe",
                "payload": payload,
            })
            .to_string(),
        )]
    }

    fn parse_text(&self, text: &str) -> Result<Vec<ParsedEvent>, SocketError> {
        let envelope: GateioEnvelope = serde_json::from_str(text).map_err(|error| SocketError::Deserialise {
            error,
            payload: text.to_owned(),
        })?;

        if envelope.channel.as_deref() != Some(CHANNEL) || envelope.event.as_deref() != Some("update") {
            return Ok(vec![]);
        }

        let tickers: Vec<GateioTicker> = match envelope.result {
            Some(value) => serde_json::from_value(value).map_err(|error| SocketError::Deserialise {
                error,
                payload: text.to_owned(),
            })?,
            None => return Ok(vec![]),
        };

        let mut events = Vec::with_capacity(tickers.len() * 2);
        for ticker in tickers {
            let symbol = symbol_translation::to_canonical(ExchangeId::Gateio, &ticker.contract)
                .map_err(|error| SocketError::Exchange(error.to_string()))?;

            if let Some(mark_price) = ticker.mark_price.as_deref() {
                events.push(ParsedEvent::MarkPrice {
                    symbol: symbol.clone(),
                    price: parse_decimal("mark_price", mark_price)?,
                });
            }

            if let Some(funding_rate) = ticker.funding_rate.as_deref() {
                events.push(ParsedEvent::FundingRate(FundingRateReceived {
                    exchange: ExchangeId::Gateio,
                    symbol,
                    funding_rate: Some(parse_decimal("funding_rate", funding_rate)?),
                    next_funding_time: Utc::now(),
                    next_funding_rate: None,
                    mark_price: ticker
                        .mark_price
                        .as_deref()
                        .map(|value| parse_decimal("mark_price", value))
                        .transpose()?,
                    source: FundingRateReceived::SOURCE_WEBSOCKET,
                    received_at: Utc::now(),
                }));
            }
        }

        Ok(events)
    }
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal, SocketError> {
    Decimal::from_str(value).map_err(|error| SocketError::Exchange(format!("invalid {field} '{value}': {error}")))
}

#[derive(Debug, Deserialize)]
struct GateioEnvelope {
    channel: Option<String>,
    event: Option<String>,
    result: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GateioTicker {
    contract: String,
    mark_price: Option<String>,
    funding_rate: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ticker_update() {
        let protocol = GateioProtocol;
        let text = r#"{"channel":"futures.tickers","event":"update","result":[{"contract":"BTC_USDT","mark_price":"60000.1","funding_rate":"0.0002"}]}"#;

        let events = protocol.parse_text(text).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            ParsedEvent::MarkPrice {
                symbol: Symbol::new("BTCUSDT").unwrap(),
                price: Decimal::from_str("60000.1").unwrap(),
            }
        );
    }

    #[test]
    fn test_subscribe_event_is_skipped() {
        let protocol = GateioProtocol;
        let text = r#"{"channel":"futures.tickers","event":"subscribe","result":{"status":"success"}}"#;
        assert_eq!(protocol.parse_text(text).unwrap(), vec![]);
    }
}
