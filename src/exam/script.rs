//! Fixed exam content: session prompts, break labels and rules.

use serde::Serialize;

pub const SESSION_COUNT: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionScript {
    pub session_number: u8,
    pub title: &'static str,
    pub prompt: &'static str,
}

const SESSIONS: [SessionScript; SESSION_COUNT as usize] = [
    SessionScript {
        session_number: 1,
        title: "Tongue Twister (American Accent)",
        prompt: "\"Betty Botter bought some butter,\n\
                 but she said 'This butter's bitter.'\n\
                 'If I put it in my batter,\n\
                 it will make my batter bitter.'\n\
                 So she bought some better butter,\n\
                 better than the bitter butter.\"",
    },
    SessionScript {
        session_number: 2,
        title: "Phonetic Transcription (American IPA)",
        prompt: "/ðə ˈnɔrθ ˌwɪnd ən ðə ˈsʌn wər dɪsˈpjutɪŋ ˈwɪtʃ wəz ðə ˈstrɔŋɡər, \
                 wɛn ə ˈtrævələr keɪm əˈlɔŋ ˈræpt ɪn ə ˈwɔrm ˈkloʊk./",
    },
    SessionScript {
        session_number: 3,
        title: "Original Text Reading",
        prompt: "\"The North Wind and the Sun were disputing which was the stronger, \
                 when a traveler came along wrapped in a warm cloak.\"",
    },
];

pub const EXAM_RULES: [&str; 5] = [
    "The exam consists of 3 consecutive sessions.",
    "Each session has a strict 1-minute time limit.",
    "Recording starts automatically. Speak clearly.",
    "There are short breaks between sessions.",
    "At the end, you must download your 3 recordings.",
];

pub fn session(session_number: u8) -> Option<&'static SessionScript> {
    SESSIONS.iter().find(|s| s.session_number == session_number)
}

/// "Up next" label on the break after `break_number`.
pub fn break_label(break_number: u8) -> Option<&'static str> {
    match break_number {
        1 => Some("Phonetic Transcription (IPA)"),
        2 => Some("Original Text Reading"),
        _ => None,
    }
}
