//! Voice selection: pick the best available synthesis voice for a locale.
//!
//! Engines expose wildly inconsistent voice inventories, so selection is a
//! ladder of preference predicates tried in order. The winner is cached until
//! the inventory changes or an explicit override is set.

use std::sync::Mutex;
use tracing::info;

/// One installed synthesis voice as reported by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceInfo {
    /// Engine-specific voice name (e.g. "Microsoft Ravi - English (India)").
    pub name: String,
    /// BCP 47 language tag (e.g. "en-IN").
    pub lang: String,
}

impl VoiceInfo {
    pub fn new(name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lang: lang.into(),
        }
    }
}

/// Name substrings that suggest a male voice across common engines.
const MALE_HINTS: &[&str] = &["male", "ravi", "david", "mark", "james"];

/// Name substrings that mark a voice as explicitly female.
const FEMALE_HINTS: &[&str] = &["female", "zira", "heera", "susan", "hazel"];

fn name_has_hint(voice: &VoiceInfo, hints: &[&str]) -> bool {
    let lower = voice.name.to_lowercase();
    hints.iter().any(|h| lower.contains(h))
}

/// Selects and caches the preferred voice for a locale.
pub struct VoicePicker {
    locale: String,
    primary_language: String,
    /// Locales acceptable as a fallback for the target locale (e.g. hi-IN
    /// alongside en-IN).
    related_locales: Vec<String>,
    cached: Mutex<Option<CachedChoice>>,
}

struct CachedChoice {
    voice: VoiceInfo,
    /// Inventory fingerprint the cache was computed against.
    inventory: Vec<String>,
    /// Explicit override survives inventory changes if the voice still exists.
    is_override: bool,
}

impl VoicePicker {
    pub fn new(locale: impl Into<String>) -> Self {
        let locale = locale.into();
        let primary_language = locale
            .split('-')
            .next()
            .unwrap_or(locale.as_str())
            .to_string();
        let related_locales = if locale.eq_ignore_ascii_case("en-IN") {
            vec!["hi-IN".to_string()]
        } else {
            Vec::new()
        };
        Self {
            locale,
            primary_language,
            related_locales,
            cached: Mutex::new(None),
        }
    }

    /// Force a specific voice by name. Cleared automatically if the voice
    /// disappears from the inventory.
    pub fn set_preferred_voice(&self, voices: &[VoiceInfo], name: &str) -> Option<VoiceInfo> {
        let found = voices.iter().find(|v| v.name == name)?.clone();
        if let Ok(mut cached) = self.cached.lock() {
            *cached = Some(CachedChoice {
                voice: found.clone(),
                inventory: fingerprint(voices),
                is_override: true,
            });
        }
        info!("VoicePicker: override set to '{}'", found.name);
        Some(found)
    }

    /// Pick the best voice from the inventory, reusing the cached choice when
    /// the inventory is unchanged.
    pub fn pick(&self, voices: &[VoiceInfo]) -> Option<VoiceInfo> {
        if voices.is_empty() {
            return None;
        }
        let inventory = fingerprint(voices);
        if let Ok(mut cached) = self.cached.lock() {
            if let Some(ref choice) = *cached {
                if choice.inventory == inventory {
                    return Some(choice.voice.clone());
                }
                // Inventory changed; an override survives if still present.
                if choice.is_override {
                    if let Some(still) = voices.iter().find(|v| v.name == choice.voice.name) {
                        let voice = still.clone();
                        *cached = Some(CachedChoice {
                            voice: voice.clone(),
                            inventory,
                            is_override: true,
                        });
                        return Some(voice);
                    }
                }
            }
            let voice = self.select(voices)?;
            info!("VoicePicker: selected '{}' ({})", voice.name, voice.lang);
            *cached = Some(CachedChoice {
                voice: voice.clone(),
                inventory,
                is_override: false,
            });
            Some(voice)
        } else {
            self.select(voices)
        }
    }

    fn select(&self, voices: &[VoiceInfo]) -> Option<VoiceInfo> {
        let locale_match =
            |v: &VoiceInfo| v.lang.eq_ignore_ascii_case(&self.locale);
        let primary_match = |v: &VoiceInfo| {
            v.lang
                .split('-')
                .next()
                .map(|p| p.eq_ignore_ascii_case(&self.primary_language))
                .unwrap_or(false)
        };

        let ladder: Vec<Box<dyn Fn(&VoiceInfo) -> bool + '_>> = vec![
            // Exact locale with a male-sounding name.
            Box::new(move |v| locale_match(v) && name_has_hint(v, MALE_HINTS)),
            // Exact locale, not explicitly female.
            Box::new(move |v| locale_match(v) && !name_has_hint(v, FEMALE_HINTS)),
            // Any exact-locale voice.
            Box::new(locale_match),
            // Related locales (e.g. hi-IN when targeting en-IN).
            Box::new(|v| {
                self.related_locales
                    .iter()
                    .any(|l| v.lang.eq_ignore_ascii_case(l))
            }),
            // Major-vendor voices for the target locale, matched by name.
            Box::new(|v| {
                let lower = v.name.to_lowercase();
                (lower.contains("google") || lower.contains("microsoft"))
                    && lower.contains(&self.locale.to_lowercase())
            }),
            // Primary language with a male-sounding name.
            Box::new(move |v| primary_match(v) && name_has_hint(v, MALE_HINTS)),
            // Any primary-language voice.
            Box::new(primary_match),
        ];

        for predicate in &ladder {
            if let Some(v) = voices.iter().find(|v| predicate(v)) {
                return Some(v.clone());
            }
        }
        voices.first().cloned()
    }
}

fn fingerprint(voices: &[VoiceInfo]) -> Vec<String> {
    voices.iter().map(|v| v.name.clone()).collect()
}
