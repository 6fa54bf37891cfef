//! Read-only section, template and role-rule tables.

use serde::{Deserialize, Serialize};

use crate::pipeline::types::{Context, Persona, Purpose};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Section {
    Greeting,
    Acknowledge,
    InternalVerification,
    CoreFacts,
    Explanation,
    Request,
    Alternative,
    NextSteps,
    Closing,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Greeting => "GREETING",
            Section::Acknowledge => "ACKNOWLEDGE",
            Section::InternalVerification => "INTERNAL_VERIFICATION",
            Section::CoreFacts => "CORE_FACTS",
            Section::Explanation => "EXPLANATION",
            Section::Request => "REQUEST",
            Section::Alternative => "ALTERNATIVE",
            Section::NextSteps => "NEXT_STEPS",
            Section::Closing => "CLOSING",
        }
    }

    /// Writing guidance for the final model.
    pub fn guidance(&self) -> &'static str {
        match self {
            Section::Greeting => "상대와의 관계에 맞는 짧은 인사로 시작합니다.",
            Section::Acknowledge => "상대의 상황이나 요청을 먼저 인정하고 공감을 표현합니다.",
            Section::InternalVerification => {
                "내부적으로 사실관계를 확인했다는 점을 분명히 밝힙니다. (예: 확인해 보니, 검토한 결과)"
            }
            Section::CoreFacts => "핵심 사실을 정확하고 간결하게 전달합니다. 자리표시자 값은 그대로 둡니다.",
            Section::Explanation => "필요한 배경과 이유를 감정 없이 설명합니다.",
            Section::Request => "원하는 행동을 구체적이고 정중하게 요청합니다.",
            Section::Alternative => "가능한 대안이나 절충안을 제시합니다.",
            Section::NextSteps => "이후 진행 방식과 일정을 안내합니다.",
            Section::Closing => "관계에 맞는 정중한 맺음말로 마무리합니다.",
        }
    }
}

/// How much room a section gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Emphasis {
    Normal,
    Shortened,
    Expanded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Template {
    pub id: &'static str,
    pub name: &'static str,
    pub sections: &'static [Section],
}

use Section::*;

pub const TEMPLATES: [Template; 9] = [
    Template {
        id: "T01",
        name: "일반",
        sections: &[Greeting, CoreFacts, Explanation, Closing],
    },
    Template {
        id: "T02",
        name: "요청",
        sections: &[Greeting, CoreFacts, Request, NextSteps, Closing],
    },
    Template {
        id: "T03",
        name: "사과",
        sections: &[Greeting, Acknowledge, CoreFacts, Explanation, NextSteps, Closing],
    },
    Template {
        id: "T04",
        name: "피드백·불만",
        sections: &[Greeting, Acknowledge, CoreFacts, Request, Alternative, Closing],
    },
    Template {
        id: "T05",
        name: "환불 거절",
        sections: &[Greeting, Acknowledge, InternalVerification, Explanation, Alternative, Closing],
    },
    Template {
        id: "T06",
        name: "일정 조율",
        sections: &[Greeting, CoreFacts, Alternative, NextSteps, Closing],
    },
    Template {
        id: "T07",
        name: "보고",
        sections: &[Greeting, CoreFacts, Explanation, NextSteps, Closing],
    },
    Template {
        id: "T08",
        name: "감사",
        sections: &[Greeting, Acknowledge, CoreFacts, Closing],
    },
    Template {
        id: "T09",
        name: "거절",
        sections: &[Greeting, Acknowledge, Explanation, Alternative, Closing],
    },
];

pub const DEFAULT_TEMPLATE_ID: &str = "T01";
pub const REFUND_REJECTION_TEMPLATE_ID: &str = "T05";

pub fn template_by_id(id: &str) -> Option<&'static Template> {
    TEMPLATES.iter().find(|t| t.id == id)
}

pub fn template_for_purpose(purpose: Purpose) -> &'static str {
    match purpose {
        Purpose::Request => "T02",
        Purpose::Apology => "T03",
        Purpose::Feedback => "T04",
        Purpose::RefundRejection => "T05",
        Purpose::Schedule => "T06",
        Purpose::Report => "T07",
        Purpose::Thanks => "T08",
        Purpose::Decline => "T09",
        Purpose::General => "T01",
    }
}

pub fn template_for_context(context: Context) -> &'static str {
    match context {
        Context::Request => "T02",
        Context::Apology => "T03",
        Context::Complaint | Context::Feedback => "T04",
        Context::Schedule => "T06",
        Context::Report => "T07",
        Context::Thanks => "T08",
        Context::Decline => "T09",
        Context::Announcement => "T01",
    }
}

/// Per-persona section rules.
#[derive(Debug, Clone, Copy)]
pub struct RoleRules {
    pub skip: &'static [Section],
    pub shorten: &'static [Section],
    pub expand: &'static [Section],
}

pub fn role_rules(persona: Persona) -> RoleRules {
    match persona {
        Persona::Boss => RoleRules {
            skip: &[],
            shorten: &[Greeting, Explanation],
            expand: &[CoreFacts, NextSteps],
        },
        Persona::Client => RoleRules {
            skip: &[InternalVerification],
            shorten: &[],
            expand: &[Acknowledge, Alternative],
        },
        Persona::Official => RoleRules {
            skip: &[Acknowledge],
            shorten: &[Greeting],
            expand: &[CoreFacts, Request],
        },
        Persona::Professor => RoleRules {
            skip: &[],
            shorten: &[Explanation],
            expand: &[Greeting, Request],
        },
        Persona::Colleague => RoleRules {
            skip: &[Greeting],
            shorten: &[Closing],
            expand: &[],
        },
        Persona::Parent => RoleRules {
            skip: &[],
            shorten: &[],
            expand: &[Acknowledge, Explanation],
        },
        Persona::Friend => RoleRules {
            skip: &[Greeting, InternalVerification],
            shorten: &[Closing, Explanation],
            expand: &[],
        },
        Persona::Other => RoleRules {
            skip: &[],
            shorten: &[],
            expand: &[],
        },
    }
}
