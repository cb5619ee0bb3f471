//! Built-in demo tools.
//!
//! The core does not own a tool catalog; these are the defaults the server
//! binary registers so a fresh install can answer arithmetic, clock, and
//! knowledge questions out of the box. External code registers its own
//! tools through the same [`crate::ToolRegistry`].

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use vox_domain::error::{Error, Result};
use vox_domain::rag::RagRetriever;

use crate::registry::{ParameterType, Tool, ToolParameter};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// calculator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Evaluates infix arithmetic: `+ - * /`, `**`, parentheses, decimals,
/// unary minus.
pub struct CalculatorTool;

#[async_trait::async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate mathematical expressions. Supports basic arithmetic (+, -, *, /), \
         exponents (**), and parentheses."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::new(
            "expression",
            ParameterType::String,
            "Mathematical expression to evaluate, e.g. '7*6' or '(1+2)**3'",
            true,
        )]
    }

    async fn execute(&self, args: &serde_json::Map<String, Value>) -> Result<Value> {
        let expression = args
            .get("expression")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let value = eval_expression(expression)?;
        // Render integers without a trailing ".0" so "7*6" answers "42".
        let rendered = if value.fract() == 0.0 && value.abs() < 1e15 {
            format!("{}", value as i64)
        } else {
            format!("{value}")
        };
        Ok(serde_json::json!({
            "expression": expression,
            "result": rendered,
        }))
    }
}

/// Recursive-descent evaluator over a token-free byte cursor.
fn eval_expression(input: &str) -> Result<f64> {
    struct Cursor<'a> {
        bytes: &'a [u8],
        pos: usize,
    }

    impl Cursor<'_> {
        fn skip_ws(&mut self) {
            while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
        }

        fn peek(&mut self) -> Option<u8> {
            self.skip_ws();
            self.bytes.get(self.pos).copied()
        }

        fn eat(&mut self, byte: u8) -> bool {
            if self.peek() == Some(byte) {
                self.pos += 1;
                true
            } else {
                false
            }
        }

        // expr := term (('+' | '-') term)*
        fn expr(&mut self) -> Result<f64> {
            let mut value = self.term()?;
            loop {
                if self.eat(b'+') {
                    value += self.term()?;
                } else if self.peek() == Some(b'-') {
                    self.pos += 1;
                    value -= self.term()?;
                } else {
                    return Ok(value);
                }
            }
        }

        // term := power (('*' | '/') power)*   -- '**' belongs to power
        fn term(&mut self) -> Result<f64> {
            let mut value = self.power()?;
            loop {
                match self.peek() {
                    Some(b'*') if self.bytes.get(self.pos + 1) != Some(&b'*') => {
                        self.pos += 1;
                        value *= self.power()?;
                    }
                    Some(b'/') => {
                        self.pos += 1;
                        let divisor = self.power()?;
                        if divisor == 0.0 {
                            return Err(Error::Validation("division by zero".into()));
                        }
                        value /= divisor;
                    }
                    _ => return Ok(value),
                }
            }
        }

        // power := unary ('**' power)?   -- right associative
        fn power(&mut self) -> Result<f64> {
            let base = self.unary()?;
            if self.peek() == Some(b'*') && self.bytes.get(self.pos + 1) == Some(&b'*') {
                self.pos += 2;
                let exponent = self.power()?;
                return Ok(base.powf(exponent));
            }
            Ok(base)
        }

        // unary := '-' unary | atom
        fn unary(&mut self) -> Result<f64> {
            if self.peek() == Some(b'-') {
                self.pos += 1;
                return Ok(-self.unary()?);
            }
            self.atom()
        }

        // atom := number | '(' expr ')'
        fn atom(&mut self) -> Result<f64> {
            if self.eat(b'(') {
                let value = self.expr()?;
                if !self.eat(b')') {
                    return Err(Error::Validation("unbalanced parentheses".into()));
                }
                return Ok(value);
            }

            self.skip_ws();
            let start = self.pos;
            while self
                .bytes
                .get(self.pos)
                .is_some_and(|b| b.is_ascii_digit() || *b == b'.')
            {
                self.pos += 1;
            }
            if start == self.pos {
                return Err(Error::Validation(format!(
                    "unexpected character at position {start}"
                )));
            }
            std::str::from_utf8(&self.bytes[start..self.pos])
                .ok()
                .and_then(|s| s.parse::<f64>().ok())
                .ok_or_else(|| Error::Validation("malformed number".into()))
        }
    }

    let mut cursor = Cursor {
        bytes: input.as_bytes(),
        pos: 0,
    };
    let value = cursor.expr()?;
    cursor.skip_ws();
    if cursor.pos != cursor.bytes.len() {
        return Err(Error::Validation(format!(
            "trailing input at position {}",
            cursor.pos
        )));
    }
    if !value.is_finite() {
        return Err(Error::Validation("result is not finite".into()));
    }
    Ok(value)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// get_time
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Current date and time, with an optional strftime-style format.
pub struct TimeTool;

#[async_trait::async_trait]
impl Tool for TimeTool {
    fn name(&self) -> &str {
        "get_time"
    }

    fn description(&self) -> &str {
        "Get current date and time information. Optionally format the output."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::new(
            "format",
            ParameterType::String,
            "strftime format string, e.g. '%Y-%m-%d %H:%M:%S'",
            false,
        )
        .with_default(serde_json::json!("%Y-%m-%d %H:%M:%S UTC"))]
    }

    async fn execute(&self, args: &serde_json::Map<String, Value>) -> Result<Value> {
        let format = args
            .get("format")
            .and_then(|v| v.as_str())
            .unwrap_or("%Y-%m-%d %H:%M:%S UTC");
        let now = Utc::now();
        Ok(serde_json::json!({
            "formatted": now.format(format).to_string(),
            "iso": now.to_rfc3339(),
            "unix": now.timestamp(),
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// get_weather
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Deterministic stand-in weather report. A real deployment swaps this
/// for a provider-backed tool registered under the same name.
pub struct WeatherTool;

#[async_trait::async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Get current weather information for a location. Returns temperature, \
         conditions, and forecast."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::new("location", ParameterType::String, "City name", true),
            ToolParameter::new("units", ParameterType::String, "Temperature units", false)
                .with_enum(vec![serde_json::json!("celsius"), serde_json::json!("fahrenheit")])
                .with_default(serde_json::json!("celsius")),
        ]
    }

    async fn execute(&self, args: &serde_json::Map<String, Value>) -> Result<Value> {
        let location = args
            .get("location")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let units = args
            .get("units")
            .and_then(|v| v.as_str())
            .unwrap_or("celsius");

        // Stable pseudo-temperature derived from the location name.
        let seed: u32 = location.bytes().map(u32::from).sum();
        let celsius = 10 + (seed % 20) as i32;
        let temperature = if units == "fahrenheit" {
            celsius * 9 / 5 + 32
        } else {
            celsius
        };

        Ok(serde_json::json!({
            "location": location,
            "temperature": temperature,
            "units": units,
            "conditions": "partly cloudy",
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// knowledge_search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Adapter exposing the RAG collaborator as a tool.
pub struct KnowledgeSearchTool {
    retriever: Arc<dyn RagRetriever>,
}

impl KnowledgeSearchTool {
    pub fn new(retriever: Arc<dyn RagRetriever>) -> Self {
        Self { retriever }
    }
}

#[async_trait::async_trait]
impl Tool for KnowledgeSearchTool {
    fn name(&self) -> &str {
        "knowledge_search"
    }

    fn description(&self) -> &str {
        "Search the knowledge base for relevant documents. Returns text snippets \
         with relevance scores and sources."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::new("query", ParameterType::String, "Search query", true),
            ToolParameter::new("top_k", ParameterType::Integer, "Max results", false)
                .with_default(serde_json::json!(5)),
        ]
    }

    async fn execute(&self, args: &serde_json::Map<String, Value>) -> Result<Value> {
        let query = args.get("query").and_then(|v| v.as_str()).unwrap_or_default();
        let top_k = args.get("top_k").and_then(|v| v.as_u64()).unwrap_or(5) as usize;

        let snippets = self.retriever.retrieve(query, None, None, top_k).await?;
        Ok(serde_json::json!({
            "query": query,
            "results": snippets,
        }))
    }
}
