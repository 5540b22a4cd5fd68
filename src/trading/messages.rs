//! Venue wire protocol.
//!
//! Outbound requests are JSON objects keyed by the request name; inbound
//! messages carry `msg_type` plus a body under the same key. Any message with
//! an `error` object short-circuits to [`VenueEvent::Rejected`].
//!
//! Numeric fields arrive as numbers in some payloads and strings in others,
//! so every read goes through [`parse_f64_field`].

use serde_json::{json, Value};

use super::types::{Candle, Direction};
use crate::error::TradeError;

pub const HISTORY_COUNT: u32 = 20;
pub const GRANULARITY_SECS: u32 = 60;

// ─────────────────────────────────────────────────────────
// Requests (session → venue)
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum VenueRequest {
    Authorize { token: String },
    SubscribeBalance,
    SubscribeCandles { symbol: String },
    Buy { direction: Direction, stake: f64, symbol: String },
    SubscribeContract { contract_id: String },
}

impl VenueRequest {
    pub fn to_json(&self) -> Value {
        match self {
            VenueRequest::Authorize { token } => json!({ "authorize": token }),
            VenueRequest::SubscribeBalance => json!({ "balance": 1, "subscribe": 1 }),
            VenueRequest::SubscribeCandles { symbol } => json!({
                "ticks_history": symbol,
                "count": HISTORY_COUNT,
                "end": "latest",
                "granularity": GRANULARITY_SECS,
                "style": "candles",
                "subscribe": 1,
            }),
            VenueRequest::Buy { direction, stake, symbol } => json!({
                "buy": 1,
                "price": stake,
                "parameters": {
                    "contract_type": direction.contract_type(),
                    "symbol": symbol,
                    "duration": 1,
                    "duration_unit": "m",
                    "basis": "stake",
                    "amount": stake,
                    "currency": "USD",
                },
            }),
            VenueRequest::SubscribeContract { contract_id } => {
                // The venue expects a numeric id; keep the string if it isn't one.
                let id = contract_id
                    .parse::<u64>()
                    .map(Value::from)
                    .unwrap_or_else(|_| Value::from(contract_id.as_str()));
                json!({ "proposal_open_contract": 1, "contract_id": id, "subscribe": 1 })
            }
        }
    }

    pub fn encode(&self) -> String {
        self.to_json().to_string()
    }
}

// ─────────────────────────────────────────────────────────
// Inbound events (venue → session)
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ContractUpdate {
    pub contract_id: Option<String>,
    pub settled: bool,
    pub profit: f64,
    pub exit_price: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VenueEvent {
    Authorized { balance: f64 },
    Balance { balance: f64 },
    History(Vec<Candle>),
    Ohlc(Candle),
    BuyAccepted { contract_id: String, buy_price: Option<f64> },
    Contract(ContractUpdate),
    /// Error envelope answering the request named by `msg_type`.
    Rejected { msg_type: Option<String>, message: String },
    /// Anything the session does not act on (pings, echoes).
    Other(String),
}

pub fn parse_message(text: &str) -> Result<VenueEvent, TradeError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| TradeError::Protocol(format!("invalid JSON: {e}")))?;
    parse_value(&value)
}

pub fn parse_value(value: &Value) -> Result<VenueEvent, TradeError> {
    let msg_type = value.get("msg_type").and_then(|v| v.as_str());

    if let Some(err) = value.get("error").filter(|e| !e.is_null()) {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        return Ok(VenueEvent::Rejected {
            msg_type: msg_type.map(str::to_string),
            message,
        });
    }

    let msg_type = msg_type.ok_or_else(|| TradeError::Protocol("missing msg_type".into()))?;
    let body = |key: &str| {
        value
            .get(key)
            .filter(|b| !b.is_null())
            .ok_or_else(|| TradeError::Protocol(format!("{msg_type} without body")))
    };

    match msg_type {
        "authorize" => {
            let auth = body("authorize")?;
            Ok(VenueEvent::Authorized {
                balance: parse_f64_field(auth, "balance").unwrap_or(0.0),
            })
        }
        "balance" => {
            let bal = body("balance")?;
            let balance = parse_f64_field(bal, "balance")
                .ok_or_else(|| TradeError::Protocol("balance without amount".into()))?;
            Ok(VenueEvent::Balance { balance })
        }
        "candles" => {
            let rows = body("candles")?
                .as_array()
                .ok_or_else(|| TradeError::Protocol("candles is not an array".into()))?;
            let candles = rows
                .iter()
                .map(|row| parse_candle(row, "epoch"))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(VenueEvent::History(candles))
        }
        "ohlc" => {
            let ohlc = body("ohlc")?;
            // open_time identifies the candle; epoch is the latest tick inside it.
            let key = if ohlc.get("open_time").is_some() { "open_time" } else { "epoch" };
            Ok(VenueEvent::Ohlc(parse_candle(ohlc, key)?))
        }
        "buy" => {
            let buy = body("buy")?;
            let contract_id = buy
                .get("contract_id")
                .and_then(value_component)
                .ok_or_else(|| TradeError::Protocol("buy without contract_id".into()))?;
            Ok(VenueEvent::BuyAccepted {
                contract_id,
                buy_price: parse_f64_field(buy, "buy_price"),
            })
        }
        "proposal_open_contract" => {
            let poc = body("proposal_open_contract")?;
            let sold_status = poc.get("status").and_then(|v| v.as_str()) == Some("sold");
            let sold_flag = poc
                .get("is_sold")
                .map(|v| v.as_bool().unwrap_or(false) || v.as_i64().unwrap_or(0) != 0)
                .unwrap_or(false);
            Ok(VenueEvent::Contract(ContractUpdate {
                contract_id: poc.get("contract_id").and_then(value_component),
                settled: sold_status || sold_flag,
                profit: parse_f64_field(poc, "profit").unwrap_or(0.0),
                exit_price: parse_f64_field(poc, "exit_tick")
                    .or_else(|| parse_f64_field(poc, "exit_spot"))
                    .unwrap_or(0.0),
            }))
        }
        other => Ok(VenueEvent::Other(other.to_string())),
    }
}

fn parse_candle(v: &Value, epoch_key: &str) -> Result<Candle, TradeError> {
    let field = |name: &str| {
        parse_f64_field(v, name)
            .ok_or_else(|| TradeError::Protocol(format!("candle missing {name}")))
    };
    let epoch = v
        .get(epoch_key)
        .and_then(|e| e.as_i64().or_else(|| e.as_str().and_then(|s| s.parse().ok())))
        .ok_or_else(|| TradeError::Protocol(format!("candle missing {epoch_key}")))?;
    Ok(Candle {
        epoch,
        open: field("open")?,
        high: field("high")?,
        low: field("low")?,
        close: field("close")?,
    })
}

fn value_component(v: &Value) -> Option<String> {
    if let Some(s) = v.as_str() {
        let t = s.trim();
        if !t.is_empty() {
            return Some(t.to_string());
        }
    }
    if let Some(n) = v.as_u64() {
        return Some(n.to_string());
    }
    if let Some(n) = v.as_i64() {
        return Some(n.to_string());
    }
    None
}

/// Parse a JSON field as f64, handling both string ("1.25") and number (1.25) formats.
fn parse_f64_field(val: &Value, field: &str) -> Option<f64> {
    val.get(field).and_then(|v| {
        v.as_f64()
            .or_else(|| v.as_str().and_then(|s| s.parse::<f64>().ok()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_request_matches_wire_format() {
        let req = VenueRequest::Buy {
            direction: Direction::Rise,
            stake: 2.5,
            symbol: "R_50".into(),
        };
        let v = req.to_json();
        assert_eq!(v["buy"], 1);
        assert_eq!(v["price"], 2.5);
        assert_eq!(v["parameters"]["contract_type"], "CALL");
        assert_eq!(v["parameters"]["symbol"], "R_50");
        assert_eq!(v["parameters"]["duration"], 1);
        assert_eq!(v["parameters"]["duration_unit"], "m");
        assert_eq!(v["parameters"]["basis"], "stake");
        assert_eq!(v["parameters"]["amount"], 2.5);
        assert_eq!(v["parameters"]["currency"], "USD");
    }

    #[test]
    fn candle_subscription_requests_twenty_minutes() {
        let v = VenueRequest::SubscribeCandles { symbol: "R_10".into() }.to_json();
        assert_eq!(v["ticks_history"], "R_10");
        assert_eq!(v["count"], 20);
        assert_eq!(v["granularity"], 60);
        assert_eq!(v["style"], "candles");
        assert_eq!(v["subscribe"], 1);
    }

    #[test]
    fn contract_subscription_uses_numeric_id() {
        let v = VenueRequest::SubscribeContract { contract_id: "12345".into() }.to_json();
        assert_eq!(v["contract_id"], 12345);
        assert_eq!(v["proposal_open_contract"], 1);
    }

    #[test]
    fn error_envelope_wins_over_body() {
        let ev = parse_message(
            r#"{"msg_type":"buy","error":{"code":"InsufficientBalance","message":"Not enough"}}"#,
        )
        .unwrap();
        assert_eq!(
            ev,
            VenueEvent::Rejected { msg_type: Some("buy".into()), message: "Not enough".into() }
        );
    }

    #[test]
    fn ohlc_prefers_open_time_and_string_prices() {
        let ev = parse_message(
            r#"{"msg_type":"ohlc","ohlc":{"open_time":1700000040,"epoch":1700000071,
                "open":"1.10","high":"1.30","low":"1.00","close":"1.20"}}"#,
        )
        .unwrap();
        assert_eq!(
            ev,
            VenueEvent::Ohlc(Candle { epoch: 1700000040, open: 1.10, high: 1.30, low: 1.00, close: 1.20 })
        );
    }

    #[test]
    fn history_batch_parses_numbers() {
        let ev = parse_message(
            r#"{"msg_type":"candles","candles":[
                {"epoch":60,"open":1,"high":2,"low":0.5,"close":1.5},
                {"epoch":120,"open":1.5,"high":2,"low":1,"close":1.8}]}"#,
        )
        .unwrap();
        match ev {
            VenueEvent::History(c) => {
                assert_eq!(c.len(), 2);
                assert_eq!(c[1].close, 1.8);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn settlement_flags() {
        let sold = parse_message(
            r#"{"msg_type":"proposal_open_contract","proposal_open_contract":
                {"contract_id":99,"is_sold":1,"status":"lost","profit":-2,"exit_tick":1.234}}"#,
        )
        .unwrap();
        assert_eq!(
            sold,
            VenueEvent::Contract(ContractUpdate {
                contract_id: Some("99".into()),
                settled: true,
                profit: -2.0,
                exit_price: 1.234,
            })
        );

        let open = parse_message(
            r#"{"msg_type":"proposal_open_contract","proposal_open_contract":
                {"contract_id":99,"is_sold":0,"status":"open","profit":0.4}}"#,
        )
        .unwrap();
        assert!(matches!(open, VenueEvent::Contract(ContractUpdate { settled: false, .. })));
    }

    #[test]
    fn malformed_messages_are_protocol_errors() {
        assert!(matches!(parse_message("not json"), Err(TradeError::Protocol(_))));
        assert!(matches!(parse_message(r#"{"foo":1}"#), Err(TradeError::Protocol(_))));
        assert!(matches!(
            parse_message(r#"{"msg_type":"buy","buy":{}}"#),
            Err(TradeError::Protocol(_))
        ));
        assert_eq!(parse_message(r#"{"msg_type":"ping","ping":"pong"}"#).unwrap(), VenueEvent::Other("ping".into()));
    }
}
