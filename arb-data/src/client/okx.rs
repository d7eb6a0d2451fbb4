use crate::client::generic::{ExchangeProtocol, ParsedEvent};
use crate::client::symbol_translation;
use crate::error::DataError;
use crate::model::FundingRateReceived;
use arb_instrument::exchange::ExchangeId;
use arb_instrument::symbol::Symbol;
use arb_integration::error::SocketError;
use arb_integration::protocol::websocket::WsMessage;
use arb_integration::signing::hmac_sha256_base64;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

/// OKX's debug-level "symbol does not exist" protocol error (component design §6/§7).
const OKX_SYMBOL_NOT_FOUND_CODE: &str = "60018";

pub const OKX_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";

/// API credentials for OKX's private-channel login (component design §4.1). `None` means the
/// client only subscribes to public channels (`funding-rate`, `mark-price`).
pub struct OkxCredentials {
    pub api_key: String,
    pub secret_key: String,
    pub passphrase: String,
}

pub struct OkxProtocol {
    pub credentials: Option<OkxCredentials>,
}

impl OkxProtocol {
    pub fn public() -> Self {
        Self { credentials: None }
    }
}

impl ExchangeProtocol for OkxProtocol {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Okx
    }

    fn ws_url(&self) -> Result<url::Url, SocketError> {
        Ok(url::Url::parse(OKX_WS_URL)?)
    }

    fn subscribe_messages(&self, symbols: &[Symbol]) -> Vec<WsMessage> {
        let args: Vec<serde_json::Value> = symbols
            .iter()
            .flat_map(|symbol| {
                let inst_id = symbol_translation::to_native(ExchangeId::Okx, symbol);
                [
                    serde_json::json!({"channel": "funding-rate", "instId": inst_id}),
                    serde_json::json!({"channel": "mark-price", "instId": inst_id}),
                ]
            })
            .collect();

        vec![WsMessage::text(
            serde_json::json!({"op": "subscribe", "args": args}).to_string(),
        )]
    }

    fn unsubscribe_messages(&self, symbols: &[Symbol]) -> Vec<WsMessage> {
        let args: Vec<serde_json::Value> = symbols
            .iter()
            .flat_map(|symbol| {
                let inst_id = symbol_translation::to_native(ExchangeId::Okx, symbol);
                [
                    serde_json::json!({"channel": "funding-rate", "instId": inst_id}),
                    serde_json::json!({"channel": "mark-price", "instId": inst_id}),
                ]
            })
            .collect();

        vec![WsMessage::text(
            serde_json::json!({"op": "unsubscribe", "args": args}).to_string(),
        )]
    }

    fn requires_login(&self) -> bool {
        self.credentials.is_some()
    }

    fn login_message(&self) -> Option<Result<WsMessage, DataError>> {
        let credentials = self.credentials.as_ref()?;
        let timestamp = Utc::now().timestamp().to_string();
        let prehash = format!("{timestamp}GET/users/self/verify");

        Some(
            hmac_sha256_base64(&credentials.secret_key, &prehash)
                .map(|sign| {
                    WsMessage::text(
                        serde_json::json!({
                            "op": "login",
                            "args": [{
                                "apiKey": credentials.api_key,
                                "passphrase": credentials.passphrase,
                                "timestamp": timestamp,
                                "sign": sign,
                            }]
                        })
                        .to_string(),
                    )
                })
                .map_err(DataError::Socket),
        )
    }

    fn parse_text(&self, text: &str) -> Result<Vec<ParsedEvent>, SocketError> {
        let message: OkxMessage = serde_json::from_str(text).map_err(|error| SocketError::Deserialise {
            error,
            payload: text.to_owned(),
        })?;

        if let Some(code) = &message.code {
            if code == OKX_SYMBOL_NOT_FOUND_CODE {
                return Ok(vec![ParsedEvent::Ignored]);
            }
            if code != "0" {
                return Err(SocketError::Exchange(format!(
                    "okx error {code}: {}",
                    message.msg.unwrap_or_default()
                )));
            }
        }

        let Some(arg) = &message.arg else {
            return Ok(vec![]);
        };
        let Some(data) = message.data else {
            return Ok(vec![]);
        };

        let events = match arg.channel.as_str() {
            "funding-rate" => data
                .into_iter()
                .map(|entry| parse_funding_rate(entry))
                .collect::<Result<Vec<_>, _>>()?,
            "mark-price" => data
                .into_iter()
                .map(parse_mark_price)
                .collect::<Result<Vec<_>, _>>()?,
            _ => vec![],
        };

        Ok(events)
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal, SocketError> {
    Decimal::from_str(value).map_err(|error| SocketError::Exchange(format!("invalid {field} '{value}': {error}")))
}

fn parse_funding_rate(entry: OkxTickerData) -> Result<ParsedEvent, SocketError> {
    let symbol = symbol_translation::to_canonical(ExchangeId::Okx, &entry.inst_id)
        .map_err(|error| SocketError::Exchange(error.to_string()))?;

    let funding_rate = entry
        .funding_rate
        .as_deref()
        .map(|value| parse_decimal("fundingRate", value))
        .transpose()?;
    let next_funding_rate = entry
        .next_funding_rate
        .as_deref()
        .map(|value| parse_decimal("nextFundingRate", value))
        .transpose()?;
    let next_funding_time = entry
        .next_funding_time
        .as_deref()
        .and_then(|v| v.parse::<i64>().ok())
        .map(millis_to_datetime)
        .unwrap_or_else(Utc::now);

    Ok(ParsedEvent::FundingRate(FundingRateReceived {
        exchange: ExchangeId::Okx,
        symbol,
        funding_rate,
        next_funding_time,
        next_funding_rate,
        mark_price: None,
        source: FundingRateReceived::SOURCE_WEBSOCKET,
        received_at: Utc::now(),
    }))
}

fn parse_mark_price(entry: OkxTickerData) -> Result<ParsedEvent, SocketError> {
    let symbol = symbol_translation::to_canonical(ExchangeId::Okx, &entry.inst_id)
        .map_err(|error| SocketError::Exchange(error.to_string()))?;
    let price = entry
        .mark_px
        .as_deref()
        .map(|value| parse_decimal("markPx", value))
        .transpose()?
        .ok_or_else(|| SocketError::Exchange("okx mark-price message missing markPx".into()))?;

    Ok(ParsedEvent::MarkPrice { symbol, price })
}

#[derive(Debug, Deserialize)]
struct OkxMessage {
    code: Option<String>,
    msg: Option<String>,
    arg: Option<OkxArg>,
    data: Option<Vec<OkxTickerData>>,
}

#[derive(Debug, Deserialize)]
struct OkxArg {
    channel: String,
}

#[derive(Debug, Deserialize)]
struct OkxTickerData {
    #[serde(rename = "instId")]
    inst_id: String,
    #[serde(rename = "fundingRate")]
    funding_rate: Option<String>,
    #[serde(rename = "nextFundingRate")]
    next_funding_rate: Option<String>,
    #[serde(rename = "nextFundingTime")]
    next_funding_time: Option<String>,
    #[serde(rename = "markPx")]
    mark_px: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_funding_rate_message() {
        let protocol = OkxProtocol::public();
        let text = r#"{"arg":{"channel":"funding-rate","instId":"BTC-USDT-SWAP"},"data":[{"instId":"BTC-USDT-SWAP","fundingRate":"0.0001","nextFundingRate":"0.00012","nextFundingTime":"1700000000000"}]}"#;

        let events = protocol.parse_text(text).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            ParsedEvent::FundingRate(received) => {
                assert_eq!(received.symbol.as_str(), "BTCUSDT");
                assert_eq!(received.funding_rate, Some(Decimal::from_str("0.0001").unwrap()));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_mark_price_message() {
        let protocol = OkxProtocol::public();
        let text = r#"{"arg":{"channel":"mark-price","instId":"ETH-USDT-SWAP"},"data":[{"instId":"ETH-USDT-SWAP","markPx":"3000.5"}]}"#;

        let events = protocol.parse_text(text).unwrap();
        assert_eq!(
            events[0],
            ParsedEvent::MarkPrice {
                symbol: Symbol::new("ETHUSDT").unwrap(),
                price: Decimal::from_str("3000.5").unwrap(),
            }
        );
    }

    #[test]
    fn test_symbol_not_found_is_ignored_not_errored() {
        let protocol = OkxProtocol::public();
        let text = r#"{"event":"error","code":"60018","msg":"symbol does not exist"}"#;

        let events = protocol.parse_text(text).unwrap();
        assert_eq!(events, vec![ParsedEvent::Ignored]);
    }

    #[test]
    fn test_other_error_code_surfaces_as_error() {
        let protocol = OkxProtocol::public();
        let text = r#"{"event":"error","code":"60012","msg":"invalid request"}"#;

        assert!(protocol.parse_text(text).is_err());
    }
}
