use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use common::{Error, PriceSource, Result};

/// Top-level strategy config file (TOML).
///
/// Example `config/strategies.toml`:
/// ```toml
/// [[indicator]]
/// type = "rsi"
/// name = "rsi14"
///
/// [indicator.params]
/// period = 14
/// source = "close"
///
/// [[entry]]
/// type = "rsi"
/// name = "EUR RSI reversal"
/// units = 1000
///
/// [entry.params]
/// indicator = "rsi14"
/// oversold = "30"
/// overbought = "70"
///
/// [exit]
/// type = "break_even_close"
///
/// [exit.params]
/// break_even_distance = "0.00540"
/// target_distances = ["0.01000"]
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    #[serde(default, rename = "indicator")]
    pub indicators: Vec<IndicatorConfig>,
    #[serde(default, rename = "entry")]
    pub entries: Vec<EntryConfig>,
    #[serde(default)]
    pub exit: Option<ExitStrategyConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndicatorConfig {
    /// "sma", "wma" or "rsi".
    #[serde(rename = "type")]
    pub indicator_type: String,
    /// Name entries use to refer to this indicator.
    pub name: String,
    #[serde(default)]
    pub params: Params,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EntryConfig {
    /// "rsi" or "ma_crossover".
    #[serde(rename = "type")]
    pub strategy_type: String,
    pub name: String,
    /// Order size carried by emitted signals.
    pub units: i64,
    #[serde(default)]
    pub params: Params,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExitStrategyConfig {
    /// "break_even_close", "full_close" or "partial_close".
    #[serde(rename = "type")]
    pub strategy_type: String,
    /// Defaults to the type.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub params: Params,
}

impl ExitStrategyConfig {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.strategy_type)
    }
}

/// Free-form `params` table with typed, fallible accessors.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Params(HashMap<String, toml::Value>);

impl Params {
    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<toml::Value>) {
        self.0.insert(key.into(), value.into());
    }

    fn required(&self, key: &str) -> Result<&toml::Value> {
        self.get(key)
            .ok_or_else(|| Error::Config(format!("missing parameter '{key}'")))
    }

    pub fn usize(&self, key: &str) -> Result<usize> {
        let value = self.required(key)?;
        value
            .as_integer()
            .and_then(|v| usize::try_from(v).ok())
            .ok_or_else(|| {
                Error::Config(format!("parameter '{key}' must be a non-negative integer"))
            })
    }

    pub fn str(&self, key: &str) -> Result<&str> {
        self.required(key)?
            .as_str()
            .ok_or_else(|| Error::Config(format!("parameter '{key}' must be a string")))
    }

    /// Decimals are written as strings (`"0.00540"`) so they parse exactly;
    /// plain integers are accepted too.
    pub fn decimal(&self, key: &str) -> Result<Decimal> {
        parse_decimal(key, self.required(key)?)
    }

    pub fn decimal_opt(&self, key: &str) -> Result<Option<Decimal>> {
        self.get(key).map(|v| parse_decimal(key, v)).transpose()
    }

    pub fn decimals(&self, key: &str) -> Result<Vec<Decimal>> {
        match self.required(key)? {
            toml::Value::Array(items) => items.iter().map(|v| parse_decimal(key, v)).collect(),
            single => Ok(vec![parse_decimal(key, single)?]),
        }
    }

    /// Price source under `source`, defaulting to the close.
    pub fn source(&self) -> Result<PriceSource> {
        match self.get("source") {
            None => Ok(PriceSource::default()),
            Some(v) => {
                let s = v
                    .as_str()
                    .ok_or_else(|| Error::Config("parameter 'source' must be a string".into()))?;
                PriceSource::from_str(s).map_err(|e| Error::Config(e.to_string()))
            }
        }
    }
}

fn parse_decimal(key: &str, value: &toml::Value) -> Result<Decimal> {
    match value {
        toml::Value::String(s) => Decimal::from_str(s.trim())
            .map_err(|e| Error::Config(format!("parameter '{key}': invalid decimal '{s}': {e}"))),
        toml::Value::Integer(i) => Ok(Decimal::from(*i)),
        other => Err(Error::Config(format!(
            "parameter '{key}' must be a decimal string, got {}",
            other.type_str()
        ))),
    }
}

impl StrategyFileConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "failed to read strategy config at '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| {
            Error::Config(format!(
                "failed to parse strategy config at '{}': {e}",
                path.display()
            ))
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SAMPLE: &str = r#"
        [[indicator]]
        type = "sma"
        name = "sma5"
        [indicator.params]
        period = 5

        [[indicator]]
        type = "wma"
        name = "wma5"
        [indicator.params]
        period = 5
        source = "median"

        [[entry]]
        type = "ma_crossover"
        name = "cross"
        units = 1000
        [entry.params]
        fast = "wma5"
        slow = "sma5"

        [exit]
        type = "partial_close"
        [exit.params]
        target_distances = ["0.00540", "0.01080"]
        close_fraction = "0.5"
    "#;

    #[test]
    fn parses_all_sections() {
        let cfg = StrategyFileConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.indicators.len(), 2);
        assert_eq!(cfg.indicators[1].params.source().unwrap(), PriceSource::Median);
        assert_eq!(cfg.indicators[0].params.source().unwrap(), PriceSource::Close);
        assert_eq!(cfg.entries[0].params.str("fast").unwrap(), "wma5");

        let exit = cfg.exit.unwrap();
        assert_eq!(exit.name(), "partial_close");
        assert_eq!(
            exit.params.decimals("target_distances").unwrap(),
            vec![dec!(0.00540), dec!(0.01080)]
        );
        assert_eq!(exit.params.decimal("close_fraction").unwrap(), dec!(0.5));
        assert_eq!(exit.params.decimal_opt("break_even_distance").unwrap(), None);
    }

    #[test]
    fn empty_file_is_valid() {
        let cfg = StrategyFileConfig::from_toml_str("").unwrap();
        assert!(cfg.indicators.is_empty());
        assert!(cfg.exit.is_none());
    }

    #[test]
    fn missing_and_mistyped_params_are_config_errors() {
        let mut params = Params::default();
        params.insert("period", "five");
        params.insert("distance", 0.5);
        assert!(matches!(params.usize("period"), Err(Error::Config(_))));
        assert!(matches!(params.usize("absent"), Err(Error::Config(_))));
        assert!(matches!(params.decimal("distance"), Err(Error::Config(_))));
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(matches!(
            StrategyFileConfig::from_toml_str("[[indicator]\ntype ="),
            Err(Error::Toml(_))
        ));
    }
}
