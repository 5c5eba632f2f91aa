//! Rule Resolver (C3, spec §4.3): declared defaults, overlaid by a rule
//! profile, overlaid by request-level overrides, with loose-type
//! coercion centralized here (the original hid this behind ad hoc
//! helpers scattered through `service.py::_build_ruleset`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum RuleKey {
    stundenbedarf_vollstaendig,
    keine_lehrerkonflikte,
    keine_klassenkonflikte,
    raum_verfuegbarkeit,
    basisplan_fixed,
    basisplan_flexible,
    basisplan_windows,
    stundenbegrenzung,
    stundenbegrenzung_erste_stunde,
    lehrer_arbeitstage,
    fach_nachmittag_regeln,
    nachmittag_pause_stunde,
    doppelstundenregel,
    einzelstunde_nur_rand,
    bandstunden_parallel,
    band_lehrer_parallel,
    mittagsschule_vormittag,
    keine_hohlstunden,
    keine_hohlstunden_hard,
    lehrer_hohlstunden_soft,
    gleichverteilung,
    W_GAPS_START,
    W_GAPS_INSIDE,
    W_EVEN_DIST,
    W_EINZEL_KANN,
    W_EINZEL_SOLL,
    W_BAND_OPTIONAL,
    W_TEACHER_GAPS,
    TEACHER_GAPS_DAY_MAX,
    TEACHER_GAPS_WEEK_MAX,
}

impl RuleKey {
    pub fn all_bool() -> &'static [RuleKey] {
        use RuleKey::*;
        &[
            stundenbedarf_vollstaendig,
            keine_lehrerkonflikte,
            keine_klassenkonflikte,
            raum_verfuegbarkeit,
            basisplan_fixed,
            basisplan_flexible,
            basisplan_windows,
            stundenbegrenzung,
            stundenbegrenzung_erste_stunde,
            lehrer_arbeitstage,
            fach_nachmittag_regeln,
            nachmittag_pause_stunde,
            doppelstundenregel,
            einzelstunde_nur_rand,
            bandstunden_parallel,
            band_lehrer_parallel,
            mittagsschule_vormittag,
            keine_hohlstunden,
            keine_hohlstunden_hard,
            lehrer_hohlstunden_soft,
            gleichverteilung,
        ]
    }

    pub fn all_weight() -> &'static [RuleKey] {
        use RuleKey::*;
        &[
            W_GAPS_START,
            W_GAPS_INSIDE,
            W_EVEN_DIST,
            W_EINZEL_KANN,
            W_EINZEL_SOLL,
            W_BAND_OPTIONAL,
            W_TEACHER_GAPS,
            TEACHER_GAPS_DAY_MAX,
            TEACHER_GAPS_WEEK_MAX,
        ]
    }

    pub fn as_str(self) -> &'static str {
        use RuleKey::*;
        match self {
            stundenbedarf_vollstaendig => "stundenbedarf_vollstaendig",
            keine_lehrerkonflikte => "keine_lehrerkonflikte",
            keine_klassenkonflikte => "keine_klassenkonflikte",
            raum_verfuegbarkeit => "raum_verfuegbarkeit",
            basisplan_fixed => "basisplan_fixed",
            basisplan_flexible => "basisplan_flexible",
            basisplan_windows => "basisplan_windows",
            stundenbegrenzung => "stundenbegrenzung",
            stundenbegrenzung_erste_stunde => "stundenbegrenzung_erste_stunde",
            lehrer_arbeitstage => "lehrer_arbeitstage",
            fach_nachmittag_regeln => "fach_nachmittag_regeln",
            nachmittag_pause_stunde => "nachmittag_pause_stunde",
            doppelstundenregel => "doppelstundenregel",
            einzelstunde_nur_rand => "einzelstunde_nur_rand",
            bandstunden_parallel => "bandstunden_parallel",
            band_lehrer_parallel => "band_lehrer_parallel",
            mittagsschule_vormittag => "mittagsschule_vormittag",
            keine_hohlstunden => "keine_hohlstunden",
            keine_hohlstunden_hard => "keine_hohlstunden_hard",
            lehrer_hohlstunden_soft => "lehrer_hohlstunden_soft",
            gleichverteilung => "gleichverteilung",
            W_GAPS_START => "W_GAPS_START",
            W_GAPS_INSIDE => "W_GAPS_INSIDE",
            W_EVEN_DIST => "W_EVEN_DIST",
            W_EINZEL_KANN => "W_EINZEL_KANN",
            W_EINZEL_SOLL => "W_EINZEL_SOLL",
            W_BAND_OPTIONAL => "W_BAND_OPTIONAL",
            W_TEACHER_GAPS => "W_TEACHER_GAPS",
            TEACHER_GAPS_DAY_MAX => "TEACHER_GAPS_DAY_MAX",
            TEACHER_GAPS_WEEK_MAX => "TEACHER_GAPS_WEEK_MAX",
        }
    }

    fn from_str(key: &str) -> Option<RuleKey> {
        Self::all_bool()
            .iter()
            .chain(Self::all_weight())
            .copied()
            .find(|k| k.as_str() == key)
    }

    /// Default value for a toggle. Weights default to the values the
    /// original Python engine hardcodes (`stundenplan_regeln.py`), bool
    /// toggles default to the conservative "on" state the original
    /// service applies when absent.
    fn default_value(self) -> RuleValue {
        use RuleKey::*;
        match self {
            W_GAPS_START => RuleValue::Weight(2),
            W_GAPS_INSIDE => RuleValue::Weight(3),
            W_EVEN_DIST => RuleValue::Weight(1),
            W_EINZEL_KANN => RuleValue::Weight(5),
            W_EINZEL_SOLL => RuleValue::Weight(5),
            W_BAND_OPTIONAL => RuleValue::Weight(2),
            W_TEACHER_GAPS => RuleValue::Weight(2),
            TEACHER_GAPS_DAY_MAX => RuleValue::Weight(1),
            TEACHER_GAPS_WEEK_MAX => RuleValue::Weight(4),
            gleichverteilung => RuleValue::Bool(false),
            keine_hohlstunden_hard => RuleValue::Bool(false),
            band_lehrer_parallel => RuleValue::Bool(false),
            _ => RuleValue::Bool(true),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleValue {
    Bool(bool),
    Weight(i64),
}

impl RuleValue {
    pub fn as_bool(self) -> bool {
        match self {
            RuleValue::Bool(b) => b,
            RuleValue::Weight(w) => w != 0,
        }
    }

    pub fn as_weight(self) -> i64 {
        match self {
            RuleValue::Bool(b) => b as i64,
            RuleValue::Weight(w) => w,
        }
    }
}

pub type EffectiveRules = BTreeMap<RuleKey, RuleValue>;

/// Loosely-typed overrides coming off the HTTP boundary (a JSON object
/// whose values may be bool, number, or numeric string).
pub type RuleOverrides = BTreeMap<String, Value>;

/// Profile row as stored by the host (column per toggle/weight).
pub type RuleProfileRow = BTreeMap<String, Value>;

pub struct RuleResolver;

impl RuleResolver {
    pub fn defaults() -> EffectiveRules {
        let mut map = EffectiveRules::new();
        for key in RuleKey::all_bool() {
            map.insert(*key, key.default_value());
        }
        for key in RuleKey::all_weight() {
            map.insert(*key, key.default_value());
        }
        map
    }

    /// Overlays a profile, then request-level overrides, onto the
    /// declared defaults. Returns the effective map plus the sorted set
    /// of active boolean rule keys for the reproducibility snapshot.
    pub fn resolve(
        profile: Option<&RuleProfileRow>,
        overrides: Option<&RuleOverrides>,
    ) -> (EffectiveRules, Vec<RuleKey>) {
        let mut effective = Self::defaults();

        if let Some(profile) = profile {
            Self::overlay(&mut effective, profile.iter().map(|(k, v)| (k.as_str(), v)));
            Self::apply_band_alias(&mut effective, profile.get("leseband_parallel"));
        }

        if let Some(overrides) = overrides {
            Self::overlay(&mut effective, overrides.iter().map(|(k, v)| (k.as_str(), v)));
            Self::apply_band_alias(&mut effective, overrides.get("leseband_parallel"));
        }

        let active: Vec<RuleKey> = RuleKey::all_bool()
            .iter()
            .copied()
            .filter(|k| effective.get(k).map(|v| v.as_bool()).unwrap_or(false))
            .collect();

        (effective, active)
    }

    fn overlay<'a>(effective: &mut EffectiveRules, entries: impl Iterator<Item = (&'a str, &'a Value)>) {
        for (key_str, value) in entries {
            let Some(key) = RuleKey::from_str(key_str) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let is_weight = RuleKey::all_weight().contains(&key);
            let fallback = effective.get(&key).copied().unwrap_or(key.default_value());
            let coerced = if is_weight {
                RuleValue::Weight(coerce_int(value, fallback.as_weight()))
            } else {
                RuleValue::Bool(coerce_bool(value, fallback.as_bool()))
            };
            effective.insert(key, coerced);
        }
    }

    /// Legacy alias: `leseband_parallel` mirrors onto `bandstunden_parallel`.
    fn apply_band_alias(effective: &mut EffectiveRules, legacy: Option<&Value>) {
        if let Some(value) = legacy {
            if value.is_null() {
                return;
            }
            let fallback = effective
                .get(&RuleKey::bandstunden_parallel)
                .map(|v| v.as_bool())
                .unwrap_or(true);
            effective.insert(
                RuleKey::bandstunden_parallel,
                RuleValue::Bool(coerce_bool(value, fallback)),
            );
        }
    }
}

fn coerce_bool(value: &Value, fallback: bool) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(fallback),
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Value::Null => fallback,
        _ => fallback,
    }
}

fn coerce_int(value: &Value, fallback: i64) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(fallback),
        Value::String(s) => s
            .parse::<i64>()
            .or_else(|_| s.parse::<f64>().map(|f| f as i64))
            .unwrap_or(fallback),
        Value::Bool(b) => *b as i64,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let defaults = RuleResolver::defaults();
        assert_eq!(defaults.len(), RuleKey::all_bool().len() + RuleKey::all_weight().len());
    }

    #[test]
    fn override_coerces_string_bool() {
        let mut overrides = RuleOverrides::new();
        overrides.insert("gleichverteilung".to_string(), Value::String("yes".into()));
        let (effective, active) = RuleResolver::resolve(None, Some(&overrides));
        assert_eq!(effective[&RuleKey::gleichverteilung], RuleValue::Bool(true));
        assert!(active.contains(&RuleKey::gleichverteilung));
    }

    #[test]
    fn override_coerces_numeric_string_weight() {
        let mut overrides = RuleOverrides::new();
        overrides.insert("W_EVEN_DIST".to_string(), Value::String("7".into()));
        let (effective, _) = RuleResolver::resolve(None, Some(&overrides));
        assert_eq!(effective[&RuleKey::W_EVEN_DIST], RuleValue::Weight(7));
    }

    #[test]
    fn legacy_alias_mirrors_onto_bandstunden_parallel() {
        let mut overrides = RuleOverrides::new();
        overrides.insert("leseband_parallel".to_string(), Value::Bool(false));
        let (effective, _) = RuleResolver::resolve(None, Some(&overrides));
        assert_eq!(effective[&RuleKey::bandstunden_parallel], RuleValue::Bool(false));
    }

    #[test]
    fn invalid_numeric_string_falls_back() {
        let mut overrides = RuleOverrides::new();
        overrides.insert("W_EVEN_DIST".to_string(), Value::String("not-a-number".into()));
        let (effective, _) = RuleResolver::resolve(None, Some(&overrides));
        assert_eq!(effective[&RuleKey::W_EVEN_DIST], RuleValue::Weight(1));
    }
}
