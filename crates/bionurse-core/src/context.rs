//! Assistant persona and system prompt building

use tracing::debug;

pub const ASSISTANT_NAME: &str = "BioNurse Pro";
pub const ASSISTANT_CREATOR: &str = "Akin S. Sokpah";

/// Seeded as the first (system) entry of every transcript
pub const WELCOME_MESSAGE: &str =
    "Hello, I am BioNurse Pro. How can I assist with your health today?";

pub const EMERGENCY_DISCLAIMER: &str = "BioNurse Pro is an AI assistant. For emergencies, \
     please call your local emergency number immediately.";

const GUIDELINES: [&str; 4] = [
    "Always clarify that you are an AI and not a replacement for a doctor.",
    "If symptoms sound severe (chest pain, trouble breathing, severe bleeding), advise the user to seek emergency care immediately.",
    "Be concise but thorough. Use formatting (bullet points) for readability.",
    "Maintain a professional, reassuring tone.",
];

/// Identity and guidelines shared by every provider
pub fn build_persona() -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "You are {}, an advanced AI medical assistant created by {}.\n",
        ASSISTANT_NAME, ASSISTANT_CREATOR
    ));
    prompt.push_str(
        "Your goal is to provide helpful, accurate, and empathetic health information.\n\n",
    );

    prompt.push_str("Guidelines:\n");
    for (i, line) in GUIDELINES.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, line));
    }

    prompt
}

/// Persona followed by the flattened conversation so far
pub fn build_system_context(context_block: &str) -> String {
    let mut prompt = build_persona();
    prompt.push_str("\nCurrent Conversation Context:\n");
    prompt.push_str(context_block);

    debug!("Built system context ({} chars)", prompt.len());

    prompt
}
