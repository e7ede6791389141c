//! Smart variables: `{token}` placeholders expanded at injection time

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use chrono::{SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use tracing::warn;

use crate::dom::Page;
use crate::errors::Result;

static TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("token pattern is valid"));

/// Zero-argument value source for one token
///
/// `Ok(None)` and `Err` both substitute the empty string.
pub type Provider = Box<dyn Fn() -> Result<Option<String>>>;

/// Expands `{name}` tokens through a provider table
#[derive(Default)]
pub struct Interpolator {
    providers: HashMap<String, Provider>,
}

impl Interpolator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `currentURL`, `currentDate` and `selectedText` for `page`
    pub fn for_page<P: Page + 'static>(page: Rc<P>) -> Self {
        let mut interpolator = Self::new();

        let url_page = page.clone();
        interpolator.register("currentURL", move || Ok(Some(url_page.href())));
        interpolator.register("currentDate", || {
            Ok(Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)))
        });
        interpolator.register("selectedText", move || Ok(page.selected_text()));

        interpolator
    }

    /// Add or replace the provider for `name`
    pub fn register<F>(&mut self, name: &str, provider: F)
    where
        F: Fn() -> Result<Option<String>> + 'static,
    {
        self.providers.insert(name.to_string(), Box::new(provider));
    }

    pub fn knows(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Expand every recognized token; unknown tokens stay literal
    pub fn interpolate(&self, template: &str) -> String {
        TOKEN
            .replace_all(template, |caps: &Captures| {
                let name = &caps[1];
                match self.providers.get(name) {
                    None => caps[0].to_string(),
                    Some(provider) => match provider() {
                        Ok(value) => value.unwrap_or_default(),
                        Err(e) => {
                            warn!(variable = name, error = %e, "Failed to resolve smart variable");
                            String::new()
                        },
                    },
                }
            })
            .into_owned()
    }

    /// Expand a JSON string; any other JSON value passes through untouched
    pub fn interpolate_value(&self, value: &Value) -> Value {
        match value {
            Value::String(template) => Value::String(self.interpolate(template)),
            other => other.clone(),
        }
    }
}

impl fmt::Debug for Interpolator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.providers.keys().collect();
        names.sort();
        f.debug_struct("Interpolator").field("providers", &names).finish()
    }
}
