//! Token usage to dollar cost conversion

use std::collections::HashMap;

use sessionstore::Cost;
use thiserror::Error;
use tracing::debug;

use super::TokenUsage;
use crate::config::ModelPrice;

/// Cache reads bill at this fraction of the input rate
const CACHE_READ_FACTOR: f64 = 0.1;

/// Cache writes bill at this multiple of the input rate
const CACHE_WRITE_FACTOR: f64 = 1.25;

const PER_MILLION: f64 = 1_000_000.0;

#[derive(Debug, Error)]
pub enum PricingError {
    #[error("No price configured for model '{0}'")]
    UnknownModel(String),
}

/// Price table lookup
///
/// A model id matches its exact key, else the longest key it starts with, so
/// `claude-sonnet-4-20250514` is priced by a `claude-sonnet-4` entry.
#[derive(Debug, Clone)]
pub struct Pricing {
    table: HashMap<String, ModelPrice>,
}

impl Pricing {
    pub fn new(table: HashMap<String, ModelPrice>) -> Self {
        debug!(models = %table.len(), "Pricing::new: called");
        Self { table }
    }

    /// Price entry for a model id
    pub fn lookup(&self, model: &str) -> Option<&ModelPrice> {
        if let Some(price) = self.table.get(model) {
            return Some(price);
        }
        self.table
            .iter()
            .filter(|(key, _)| model.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, price)| price)
    }

    /// Fail unless the model has a price
    pub fn ensure_known(&self, model: &str) -> Result<(), PricingError> {
        self.lookup(model)
            .map(|_| ())
            .ok_or_else(|| PricingError::UnknownModel(model.to_string()))
    }

    /// Convert usage into a cost record
    pub fn cost(&self, model: &str, usage: &TokenUsage) -> Result<Cost, PricingError> {
        let price = self
            .lookup(model)
            .ok_or_else(|| PricingError::UnknownModel(model.to_string()))?;

        let input_rate = price.input_per_mtok / PER_MILLION;
        let output_rate = price.output_per_mtok / PER_MILLION;
        let usd = usage.input_tokens as f64 * input_rate
            + usage.cache_read_tokens as f64 * input_rate * CACHE_READ_FACTOR
            + usage.cache_creation_tokens as f64 * input_rate * CACHE_WRITE_FACTOR
            + usage.output_tokens as f64 * output_rate;

        let input_tokens = usage.input_tokens + usage.cache_read_tokens + usage.cache_creation_tokens;
        debug!(%model, input_tokens, output_tokens = usage.output_tokens, usd, "Pricing::cost: computed");
        Ok(Cost::new(input_tokens, usage.output_tokens, usd))
    }
}
