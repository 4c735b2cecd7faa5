pub mod base;
pub mod router;
pub mod skills;

pub use base::{
    expose_skill_actions, ActionSet, Agent, AgentCapabilities, AgentResponse, AgentStatus, Skill,
    SkillAction, SkillOutput,
};
pub use router::{IntentDecision, IntentRouter, IntentSource, TieBreakRule};
pub use skills::{register_travel_agents, PromptSkill, SkillDefinition, TRAVEL_SKILLS};
