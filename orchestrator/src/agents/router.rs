// Intent router.
//
// Resolves a free-text query to exactly one agent: keyword scoring, then an
// optional model classifier, then hand-written tie-break rules, then a fixed
// default. The chosen agent is invoked through its `execute`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::base::{AgentCapabilities, AgentResponse};
use super::skills::SkillDefinition;
use crate::llm::{ChatMessage, TextCompletion};
use crate::metrics;
use crate::protocol::{Broker, Payload};

pub const ROUTER_NAME: &str = "intent_router";
pub const INTENT_NOT_RECOGNIZED: &str = "intent not recognized";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentSource {
    /// Keyword scoring and the model classifier agreed.
    Agree,
    Keyword,
    Model,
    TieBreak,
    Default,
}

impl IntentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentSource::Agree => "agree",
            IntentSource::Keyword => "keyword",
            IntentSource::Model => "model",
            IntentSource::TieBreak => "tie_break",
            IntentSource::Default => "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentDecision {
    pub agent: String,
    pub source: IntentSource,
    pub keyword_intent: Option<String>,
    pub model_intent: Option<String>,
}

/// Prefer `prefer` when the query mentions a word from every group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TieBreakRule {
    pub groups: Vec<Vec<String>>,
    pub prefer: String,
}

impl TieBreakRule {
    pub fn new(prefer: impl Into<String>, groups: &[&[&str]]) -> Self {
        Self {
            groups: groups
                .iter()
                .map(|group| group.iter().map(|word| word.to_lowercase()).collect())
                .collect(),
            prefer: prefer.into(),
        }
    }

    fn matches(&self, query: &str) -> bool {
        !self.groups.is_empty()
            && self
                .groups
                .iter()
                .all(|group| group.iter().any(|word| query.contains(word.as_str())))
    }
}

pub struct IntentRouter {
    broker: Arc<Broker>,
    /// Agent name and its lower-cased keywords, in declaration order.
    keywords: Vec<(String, Vec<String>)>,
    descriptions: HashMap<String, String>,
    classifier: Option<Arc<dyn TextCompletion>>,
    tie_breaks: Vec<TieBreakRule>,
    default_agent: String,
}

impl IntentRouter {
    pub fn new(broker: Arc<Broker>, default_agent: impl Into<String>) -> Self {
        Self {
            broker,
            keywords: Vec::new(),
            descriptions: HashMap::new(),
            classifier: None,
            tie_breaks: Vec::new(),
            default_agent: default_agent.into(),
        }
    }

    /// Router over the given skills, with the route-first tie-breaks.
    pub fn for_skills(broker: Arc<Broker>, skills: &[SkillDefinition]) -> Self {
        let default_agent = skills.first().map(|s| s.name).unwrap_or_default();
        let mut router = Self::new(broker, default_agent);
        for skill in skills {
            router = router.with_agent(skill.name, skill.description, skill.keywords);
        }
        router
            .with_tie_break(TieBreakRule::new(
                "route",
                &[&["route", "navigate", "how to get"], &["weather", "rain", "temperature"]],
            ))
            .with_tie_break(TieBreakRule::new(
                "route",
                &[&["route", "navigate", "how to get"], &["budget", "cost", "spend"]],
            ))
    }

    pub fn with_agent(mut self, name: &str, description: &str, keywords: &[&str]) -> Self {
        self.keywords.push((
            name.to_string(),
            keywords.iter().map(|k| k.to_lowercase()).collect(),
        ));
        self.descriptions.insert(name.to_string(), description.to_string());
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn TextCompletion>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_tie_break(mut self, rule: TieBreakRule) -> Self {
        self.tie_breaks.push(rule);
        self
    }

    /// Highest keyword score wins. No hits, or a tie for the top score, gives
    /// no answer.
    pub fn classify_by_keywords(&self, query: &str) -> Option<String> {
        let query = query.to_lowercase();
        let mut best: Option<(&str, usize)> = None;
        let mut tied = false;

        for (agent, keywords) in &self.keywords {
            let score = keywords.iter().filter(|k| query.contains(k.as_str())).count();
            if score == 0 {
                continue;
            }
            match best {
                Some((_, top)) if score < top => {}
                Some((_, top)) if score == top => tied = true,
                _ => {
                    best = Some((agent.as_str(), score));
                    tied = false;
                }
            }
        }

        match best {
            Some((agent, _)) if !tied => Some(agent.to_string()),
            _ => None,
        }
    }

    /// Ask the classifier for an agent name. Failures and unknown names count
    /// as no answer.
    pub async fn classify_by_model(&self, query: &str, context: Option<&str>) -> Option<String> {
        let classifier = self.classifier.as_ref()?;

        let catalogue: Vec<String> = self
            .keywords
            .iter()
            .map(|(name, _)| {
                let description = self.descriptions.get(name).map(String::as_str).unwrap_or("");
                format!("- {name}: {description}")
            })
            .collect();
        let system = format!(
            "You route travel questions to one specialist.\nSpecialists:\n{}\n\
             Reply with the specialist name only.",
            catalogue.join("\n")
        );
        let mut user = format!("Question: {query}");
        if let Some(context) = context.filter(|c| !c.is_empty()) {
            user.push_str(&format!("\nConversation so far: {context}"));
        }

        match classifier
            .complete(&[ChatMessage::system(system), ChatMessage::user(user)])
            .await
        {
            Ok(answer) => {
                let name = answer
                    .trim()
                    .trim_matches(|c: char| !c.is_alphanumeric() && c != '_')
                    .to_lowercase();
                if self.keywords.iter().any(|(agent, _)| *agent == name) {
                    Some(name)
                } else {
                    warn!(answer = %answer, "Classifier named an unknown agent");
                    None
                }
            }
            Err(e) => {
                warn!(error = %e, "Model intent classification failed");
                None
            }
        }
    }

    fn apply_tie_breaks(&self, query: &str) -> Option<String> {
        let query = query.to_lowercase();
        self.tie_breaks
            .iter()
            .find(|rule| rule.matches(&query))
            .map(|rule| rule.prefer.clone())
    }

    pub async fn resolve(&self, query: &str, context: Option<&str>) -> IntentDecision {
        let keyword_intent = self.classify_by_keywords(query);
        let model_intent = self.classify_by_model(query, context).await;

        let (agent, source) = match (&keyword_intent, &model_intent) {
            (Some(k), Some(m)) if k == m => (k.clone(), IntentSource::Agree),
            // On disagreement the classifier, which sees the whole sentence, wins.
            (_, Some(m)) => (m.clone(), IntentSource::Model),
            (Some(k), None) => (k.clone(), IntentSource::Keyword),
            (None, None) => match self.apply_tie_breaks(query) {
                Some(agent) => (agent, IntentSource::TieBreak),
                None => (self.default_agent.clone(), IntentSource::Default),
            },
        };

        metrics::record_router_decision(source.as_str());
        IntentDecision {
            agent,
            source,
            keyword_intent,
            model_intent,
        }
    }

    /// Classify `query` and run the chosen agent. Always yields exactly one
    /// agent's response or an explicit "intent not recognized" failure.
    pub async fn route(&self, query: &str, context: Option<&str>) -> AgentResponse {
        if query.trim().is_empty() {
            return AgentResponse::failure(ROUTER_NAME, format!("{INTENT_NOT_RECOGNIZED}: empty query"));
        }

        let decision = self.resolve(query, context).await;
        let Some(agent) = self.broker.registry().agent(&decision.agent) else {
            warn!(agent = %decision.agent, "Resolved agent is not registered");
            return AgentResponse::failure(
                ROUTER_NAME,
                format!("{INTENT_NOT_RECOGNIZED}: no agent named {}", decision.agent),
            );
        };

        info!(
            agent = %decision.agent,
            source = decision.source.as_str(),
            "Routing query"
        );

        let mut payload = Payload::new();
        payload.insert("query".into(), json!(query));
        if let Some(context) = context {
            payload.insert("context".into(), json!(context));
        }

        let mut metadata = Payload::new();
        metadata.insert("routed_agent".into(), json!(decision.agent));
        metadata.insert("intent_source".into(), json!(decision.source.as_str()));
        metadata.insert("keyword_intent".into(), json!(decision.keyword_intent));
        metadata.insert("model_intent".into(), json!(decision.model_intent));
        metadata.insert("original_query".into(), json!(query));

        agent.execute(payload).await.with_metadata(metadata)
    }

    /// Run several agents one after another on the same query.
    pub async fn execute_many(&self, query: &str, agents: &[&str]) -> Vec<(String, AgentResponse)> {
        let mut results = Vec::with_capacity(agents.len());
        for &name in agents {
            let response = match self.broker.registry().agent(name) {
                Some(agent) => {
                    let mut payload = Payload::new();
                    payload.insert("query".into(), Value::String(query.to_string()));
                    agent.execute(payload).await
                }
                None => AgentResponse::failure(name, format!("agent not found: {name}")),
            };
            results.push((name.to_string(), response));
        }
        results
    }

    /// Routable agents that are currently registered.
    pub fn available_agents(&self) -> Vec<String> {
        self.keywords
            .iter()
            .map(|(name, _)| name.clone())
            .filter(|name| self.broker.registry().contains(name))
            .collect()
    }

    pub fn agent_status(&self) -> Vec<AgentCapabilities> {
        self.available_agents()
            .iter()
            .filter_map(|name| self.broker.registry().agent(name))
            .map(|agent| agent.capabilities())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::skills::TRAVEL_SKILLS;
    use crate::agents::Agent;
    use crate::testing::{EchoSkill, FailingCompletion, StaticCompletion};

    fn travel_router() -> (Arc<Broker>, IntentRouter) {
        let broker = Broker::new_shared(None);
        for skill in TRAVEL_SKILLS {
            Agent::new(Arc::new(EchoSkill::named(skill.name)), &broker, 2).unwrap();
        }
        let router = IntentRouter::for_skills(broker.clone(), TRAVEL_SKILLS);
        (broker, router)
    }

    #[test]
    fn test_keyword_scoring_picks_highest() {
        let (_broker, router) = travel_router();

        assert_eq!(
            router.classify_by_keywords("Any cheap hotel room near the old town?"),
            Some("lodging".to_string())
        );
        assert_eq!(
            router.classify_by_keywords("Will it RAIN, and what is the forecast?"),
            Some("weather".to_string())
        );
        assert_eq!(router.classify_by_keywords("hello there"), None);
    }

    #[test]
    fn test_keyword_tie_is_ambiguous() {
        let (_broker, router) = travel_router();
        assert_eq!(router.classify_by_keywords("route in the rain"), None);
    }

    #[test]
    fn test_keyword_classification_is_deterministic() {
        let (_broker, router) = travel_router();
        let query = "what does a museum ticket cost, and where to eat?";
        let first = router.classify_by_keywords(query);
        for _ in 0..20 {
            assert_eq!(router.classify_by_keywords(query), first);
        }
        assert_eq!(first, Some("poi".to_string()));
    }

    #[tokio::test]
    async fn test_tie_break_then_default() {
        let (_broker, router) = travel_router();

        let tie = router.resolve("best route if there is rain", None).await;
        assert_eq!(tie.agent, "route");
        assert_eq!(tie.source, IntentSource::TieBreak);

        let fallback = router.resolve("hello there", None).await;
        assert_eq!(fallback.agent, "route");
        assert_eq!(fallback.source, IntentSource::Default);
    }

    #[tokio::test]
    async fn test_model_and_keywords_agree_or_model_wins() {
        let (broker, _) = travel_router();
        let router = IntentRouter::for_skills(broker.clone(), TRAVEL_SKILLS)
            .with_classifier(Arc::new(StaticCompletion::new("Weather.")));

        let agree = router.resolve("is there snow on the pass?", None).await;
        assert_eq!(agree.source, IntentSource::Agree);
        assert_eq!(agree.agent, "weather");

        let disagree = router.resolve("which hotel has a view?", None).await;
        assert_eq!(disagree.source, IntentSource::Model);
        assert_eq!(disagree.agent, "weather");
        assert_eq!(disagree.keyword_intent.as_deref(), Some("lodging"));
    }

    #[tokio::test]
    async fn test_model_failure_falls_back_to_keywords() {
        let (broker, _) = travel_router();
        let router = IntentRouter::for_skills(broker, TRAVEL_SKILLS)
            .with_classifier(Arc::new(FailingCompletion::new("offline")));

        let decision = router.resolve("how much will fuel cost", None).await;
        assert_eq!(decision.agent, "budget");
        assert_eq!(decision.source, IntentSource::Keyword);
        assert!(decision.model_intent.is_none());
    }

    #[tokio::test]
    async fn test_route_executes_chosen_agent() {
        let (broker, router) = travel_router();

        let response = router.route("Recommend a guesthouse in Dali", Some("two adults")).await;

        assert!(response.success);
        assert_eq!(response.agent_name, "lodging");
        assert_eq!(response.data["query"], "Recommend a guesthouse in Dali");
        assert_eq!(response.data["context"], "two adults");
        assert_eq!(response.metadata["routed_agent"], "lodging");
        assert_eq!(response.metadata["intent_source"], "keyword");
        assert_eq!(
            broker.registry().agent("lodging").unwrap().capabilities().execution_count,
            1
        );
    }

    #[tokio::test]
    async fn test_route_rejects_empty_and_unregistered() {
        let (broker, router) = travel_router();

        let empty = router.route("   ", None).await;
        assert!(!empty.success);
        assert!(empty.message.starts_with(INTENT_NOT_RECOGNIZED));

        broker.unregister_agent("route");
        let orphan = router.route("hello there", None).await;
        assert!(!orphan.success);
        assert!(orphan.message.starts_with(INTENT_NOT_RECOGNIZED));
        assert!(!router.available_agents().contains(&"route".to_string()));
    }

    #[tokio::test]
    async fn test_execute_many_collects_each_agent() {
        let (_broker, router) = travel_router();

        let results = router.execute_many("Kunming", &["weather", "ghost", "budget"]).await;

        assert_eq!(results.len(), 3);
        assert!(results[0].1.success);
        assert!(!results[1].1.success);
        assert_eq!(results[2].0, "budget");
        assert_eq!(router.agent_status().len(), 5);
    }
}
