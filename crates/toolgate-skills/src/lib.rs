pub mod registry;
pub mod skill;

pub use registry::SkillRegistry;
pub use skill::{Skill, SkillDescriptor};
