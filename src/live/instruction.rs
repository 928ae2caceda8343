use crate::session::{SessionConfig, SessionMode, Stance};

/// Build the model's system instruction for a coaching session
pub fn system_instruction(config: &SessionConfig) -> String {
    let details = &config.details;
    let language = details
        .language
        .as_deref()
        .filter(|l| !l.trim().is_empty())
        .unwrap_or("English");
    let lang_instruction = format!("You must speak exclusively in {}.", language);

    match config.mode {
        SessionMode::Interview => {
            let company = details
                .company
                .as_deref()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or("a top-tier tech company");
            let role = details
                .role
                .as_deref()
                .filter(|r| !r.trim().is_empty())
                .unwrap_or("Software Engineer");

            format!(
                "{lang_instruction} You are a strict, professional recruiter for {company}.\n\
                 The candidate is applying for the role of {role}.\n\
                 Conduct a realistic screening interview.\n\
                 Do NOT be a \"yes-man\". Challenge weak answers.\n\
                 Observe their non-verbal cues (posture, eye contact) via the video feed and verbally note if they seem nervous or distracted, but only if it's significant.\n\
                 Keep your responses concise and conversational. Interrupt politely if they ramble."
            )
        }
        SessionMode::Debate => {
            let stance = details.stance.unwrap_or(Stance::Pro);
            let model_side = match stance {
                Stance::Pro => "CON",
                Stance::Con => "PRO",
            };
            let topic = details.topic.as_deref().unwrap_or_default();

            format!(
                "{lang_instruction} You are a skilled debater arguing the {model_side} side of the topic: \"{topic}\".\n\
                 The user is arguing the {stance} side.\n\
                 Your goal is to dismantle their arguments with logic and facts.\n\
                 Be respectful but firm and competitive.\n\
                 Observe their body language via the video feed; if they look unsure, point it out as a sign of weakness in their argument.\n\
                 Keep your responses sharp and engaging."
            )
        }
    }
}
