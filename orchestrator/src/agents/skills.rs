// Travel skills.
//
// Each specialist is a prompt-driven skill over the text-completion
// collaborator; the domain rules live in the model, not here. The keyword
// sets double as the router's scoring table.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::base::{expose_skill_actions, Agent, Skill, SkillOutput};
use crate::error::{Result, SkillError};
use crate::llm::{ChatMessage, TextCompletion};
use crate::protocol::{Broker, Payload};

#[derive(Debug, Clone, Copy)]
pub struct SkillDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub keywords: &'static [&'static str],
    pub instructions: &'static str,
}

pub const ROUTE: SkillDefinition = SkillDefinition {
    name: "route",
    description: "Plans the route between origin and destination, split into daily legs",
    keywords: &[
        "route", "directions", "navigate", "navigation", "how to get", "drive", "ride",
        "road", "via", "itinerary", "path",
    ],
    instructions: "You are a route planner. Propose a route from the origin to the destination, \
        split into daily legs with distances and the main roads or transfers. Note any \
        stretches that need extra care.",
};

pub const WEATHER: SkillDefinition = SkillDefinition {
    name: "weather",
    description: "Summarises expected weather along the trip and what it means for travel",
    keywords: &[
        "weather", "temperature", "rain", "snow", "wind", "forecast", "climate", "storm",
        "sunny", "visibility",
    ],
    instructions: "You are a weather analyst. Describe the expected weather at the destination \
        and along the way for the travel dates, and list the precautions and gear it calls for.",
};

pub const LODGING: SkillDefinition = SkillDefinition {
    name: "lodging",
    description: "Suggests places to stay for each night of the trip",
    keywords: &[
        "hotel", "lodging", "stay", "accommodation", "hostel", "room", "inn", "guesthouse",
        "check-in",
    ],
    instructions: "You are a lodging specialist. Suggest where to stay for each night, matching \
        the party size, travel style and budget, with an approximate nightly price.",
};

pub const POI: SkillDefinition = SkillDefinition {
    name: "poi",
    description: "Finds attractions, food and practical stops along the route",
    keywords: &[
        "restaurant", "food", "eat", "attraction", "sight", "museum", "park", "scenic",
        "fuel", "gas station", "repair", "hospital", "pharmacy",
    ],
    instructions: "You are a local guide. Recommend attractions, places to eat and practical \
        stops (fuel, repairs, medical) that fit the traveller's interests and the route.",
};

pub const BUDGET: SkillDefinition = SkillDefinition {
    name: "budget",
    description: "Estimates the trip cost and checks it against the stated budget",
    keywords: &[
        "budget", "cost", "price", "expense", "how much", "cheap", "fee", "spend", "money",
        "afford",
    ],
    instructions: "You are a budget planner. Estimate transport, lodging, food and activity \
        costs from the findings so far, compare the total with the stated budget and suggest \
        savings if it does not fit.",
};

/// Default skills, in pipeline order.
pub const TRAVEL_SKILLS: &[SkillDefinition] = &[ROUTE, WEATHER, LODGING, POI, BUDGET];

pub struct PromptSkill {
    definition: SkillDefinition,
    llm: Arc<dyn TextCompletion>,
}

impl PromptSkill {
    pub fn new(definition: SkillDefinition, llm: Arc<dyn TextCompletion>) -> Self {
        Self { definition, llm }
    }

    /// Key under which this skill's text lands in the pipeline context.
    pub fn result_key(&self) -> String {
        format!("{}_result", self.definition.name)
    }

    fn build_prompt(&self, payload: &Payload) -> std::result::Result<String, SkillError> {
        let mut prompt = String::new();

        if let Some(query) = payload.get("query").and_then(Value::as_str) {
            prompt.push_str(&format!("Traveller question:\n{query}\n\n"));
        }
        if let Some(request) = payload.get("request").filter(|r| !r.is_null()) {
            let rendered = serde_json::to_string_pretty(request)
                .map_err(|e| SkillError::msg(e.to_string()))?;
            prompt.push_str(&format!("Trip request:\n{rendered}\n\n"));
        }
        if prompt.is_empty() {
            return Err(SkillError::MissingParameter("query or request".to_string()));
        }

        if let Some(context) = payload.get("context").and_then(Value::as_object) {
            let findings: Vec<String> = context
                .iter()
                .filter_map(|(key, value)| value.as_str().map(|text| format!("[{key}]\n{text}")))
                .collect();
            if !findings.is_empty() {
                prompt.push_str("Findings so far:\n");
                prompt.push_str(&findings.join("\n\n"));
                prompt.push('\n');
            }
        } else if let Some(context) = payload.get("context").and_then(Value::as_str) {
            prompt.push_str(&format!("Conversation so far:\n{context}\n"));
        }

        Ok(prompt)
    }
}

#[async_trait]
impl Skill for PromptSkill {
    fn name(&self) -> &str {
        self.definition.name
    }

    fn description(&self) -> &str {
        self.definition.description
    }

    async fn run(&self, payload: Payload) -> std::result::Result<SkillOutput, SkillError> {
        let prompt = self.build_prompt(&payload)?;
        let messages = [
            ChatMessage::system(self.definition.instructions),
            ChatMessage::user(prompt),
        ];
        let text = self.llm.complete(&messages).await?;

        let mut data = Payload::new();
        data.insert(self.result_key(), Value::String(text));
        Ok(SkillOutput::new(Value::Object(data))
            .with_message(format!("{} finished", self.definition.name)))
    }
}

/// Build, register and expose one agent per definition.
pub fn register_travel_agents(
    broker: &Arc<Broker>,
    llm: Arc<dyn TextCompletion>,
    definitions: &[SkillDefinition],
    max_concurrency: usize,
) -> Result<Vec<Arc<Agent>>> {
    definitions
        .iter()
        .map(|definition| {
            let skill = Arc::new(PromptSkill::new(*definition, llm.clone()));
            let agent = Agent::new(skill, broker, max_concurrency)?;
            expose_skill_actions(&agent)?;
            info!(agent = %definition.name, "Travel agent ready");
            Ok(agent)
        })
        .collect()
}
