//! Which provider and model serve each kind of LLM call.

use std::{collections::BTreeMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use tracing::{info, warn};

use crate::{
  Error, Result,
  anthropic::AnthropicProvider,
  openai::OpenAiProvider,
  retry::RetryPolicy,
  traits::Provider,
};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
  AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
  Chat,
  Debate,
  Judge,
  Moderator,
  Issue,
}

impl Role {
  pub const ALL: [Role; 5] = [Role::Chat, Role::Debate, Role::Judge, Role::Moderator, Role::Issue];
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProviderKind {
  Anthropic,
  OpenAi,
  OpenRouter,
}

impl ProviderKind {
  /// Preference order when a role has no usable explicit choice.
  const FALLBACK_ORDER: [ProviderKind; 3] =
    [ProviderKind::Anthropic, ProviderKind::OpenAi, ProviderKind::OpenRouter];

  pub fn default_model(self) -> &'static str {
    match self {
      ProviderKind::Anthropic => "claude-sonnet-4-20250514",
      ProviderKind::OpenAi => "gpt-4o-mini",
      ProviderKind::OpenRouter => "anthropic/claude-sonnet-4",
    }
  }
}

/// API keys as read from configuration. Blank keys count as missing.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProviderKeys {
  pub anthropic:  Option<String>,
  pub openai:     Option<String>,
  pub openrouter: Option<String>,
}

impl ProviderKeys {
  fn get(&self, kind: ProviderKind) -> Option<&str> {
    let key = match kind {
      ProviderKind::Anthropic => &self.anthropic,
      ProviderKind::OpenAi => &self.openai,
      ProviderKind::OpenRouter => &self.openrouter,
    };
    key.as_deref().map(str::trim).filter(|k| !k.is_empty())
  }
}

/// Provider and (optional) model configured for one role.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelChoice {
  pub provider: ProviderKind,
  #[serde(default)]
  pub model:    Option<String>,
}

#[derive(Clone)]
pub struct Route {
  pub provider: Arc<dyn Provider>,
  pub model:    String,
}

impl fmt::Debug for Route {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Route")
      .field("provider", &self.provider.name())
      .field("model", &self.model)
      .finish()
  }
}

#[derive(Debug, Clone)]
pub struct LlmRoutes {
  default: Route,
  routes:  BTreeMap<Role, Route>,
}

impl LlmRoutes {
  /// Serve every role with one provider and model.
  pub fn uniform(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
    Self { default: Route { provider, model: model.into() }, routes: BTreeMap::new() }
  }

  pub fn with_route(mut self, role: Role, route: Route) -> Self {
    self.routes.insert(role, route);
    self
  }

  pub fn route(&self, role: Role) -> &Route { self.routes.get(&role).unwrap_or(&self.default) }

  /// Build routes from keys and per-role choices. A role whose chosen
  /// provider has no key falls back to the first configured provider.
  pub fn from_config(
    keys: &ProviderKeys,
    choices: &BTreeMap<Role, ModelChoice>,
    retry: RetryPolicy,
  ) -> Result<Self> {
    let mut available: Vec<(ProviderKind, Arc<dyn Provider>)> = Vec::new();
    for kind in ProviderKind::FALLBACK_ORDER {
      let Some(key) = keys.get(kind) else { continue };
      let provider: Arc<dyn Provider> = match kind {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(key)?.with_retry_policy(retry)),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(key)?.with_retry_policy(retry)),
        ProviderKind::OpenRouter => {
          Arc::new(OpenAiProvider::openrouter(key)?.with_retry_policy(retry))
        }
      };
      available.push((kind, provider));
    }

    let (first_kind, first) = available.first().cloned().ok_or(Error::NoProvider)?;
    let mut routes =
      Self::uniform(first, choices_model(choices, first_kind).unwrap_or(first_kind.default_model()));

    for (role, choice) in choices {
      let Some((_, provider)) = available.iter().find(|(k, _)| *k == choice.provider) else {
        warn!(%role, provider = %choice.provider, fallback = %first_kind, "no API key for chosen provider");
        continue;
      };
      let model = choice.model.clone().unwrap_or_else(|| choice.provider.default_model().to_owned());
      routes = routes.with_route(*role, Route { provider: provider.clone(), model });
    }

    for role in Role::ALL {
      let route = routes.route(role);
      info!(%role, provider = route.provider.name(), model = %route.model, "llm route");
    }
    Ok(routes)
  }
}

/// A model explicitly configured for `kind` on any role.
fn choices_model(choices: &BTreeMap<Role, ModelChoice>, kind: ProviderKind) -> Option<&str> {
  choices.values().find(|c| c.provider == kind).and_then(|c| c.model.as_deref())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn keys(anthropic: Option<&str>, openai: Option<&str>) -> ProviderKeys {
    ProviderKeys {
      anthropic:  anthropic.map(str::to_owned),
      openai:     openai.map(str::to_owned),
      openrouter: None,
    }
  }

  #[test]
  fn no_keys_is_an_error() {
    let err = LlmRoutes::from_config(&keys(None, Some("  ")), &BTreeMap::new(), RetryPolicy::none())
      .unwrap_err();
    assert!(matches!(err, Error::NoProvider));
  }

  #[test]
  fn unconfigured_roles_use_first_provider() {
    let routes =
      LlmRoutes::from_config(&keys(None, Some("sk")), &BTreeMap::new(), RetryPolicy::none()).unwrap();
    for role in Role::ALL {
      assert_eq!(routes.route(role).provider.name(), "openai");
      assert_eq!(routes.route(role).model, "gpt-4o-mini");
    }
  }

  #[test]
  fn explicit_choice_wins_and_missing_key_falls_back() {
    let mut choices = BTreeMap::new();
    choices.insert(Role::Judge, ModelChoice { provider: ProviderKind::OpenAi, model: Some("gpt-4o".into()) });
    choices.insert(Role::Chat, ModelChoice { provider: ProviderKind::OpenRouter, model: None });

    let routes =
      LlmRoutes::from_config(&keys(Some("ant"), Some("sk")), &choices, RetryPolicy::none()).unwrap();
    assert_eq!(routes.route(Role::Judge).provider.name(), "openai");
    assert_eq!(routes.route(Role::Judge).model, "gpt-4o");
    assert_eq!(routes.route(Role::Chat).provider.name(), "anthropic");
    assert_eq!(routes.route(Role::Debate).model, "claude-sonnet-4-20250514");
  }

  #[test]
  fn roles_parse_from_config_names() {
    assert_eq!("moderator".parse::<Role>().unwrap(), Role::Moderator);
    assert_eq!(ProviderKind::OpenRouter.as_ref(), "openrouter");
  }
}
