use crate::types::Constraint;

// ── Conversion tables ─────────────────────────────────────────────────────────

/// (label substring, base unit) — which KG base unit a property normalizes to.
/// Matching is by substring on the lowercased property label, first hit wins.
const PROPERTY_BASE_UNITS: &[(&str, &str)] = &[
    ("runtime", "seconds"),
    ("duration", "seconds"),
    ("elevation", "meters"),
    ("height", "meters"),
    ("length", "meters"),
    ("mass", "kilograms"),
    ("weight", "kilograms"),
    ("area", "square kilometers"),
];

/// (base unit, source unit, factor) — value_in_base = value_in_source * factor.
const CONVERSION_FACTORS: &[(&str, &str, f64)] = &[
    ("seconds", "minute", 60.0),
    ("seconds", "min", 60.0),
    ("seconds", "hour", 3600.0),
    ("seconds", "hr", 3600.0),
    ("seconds", "day", 86400.0),
    ("meters", "km", 1000.0),
    ("meters", "kilometer", 1000.0),
    ("meters", "cm", 0.01),
    ("meters", "foot", 0.3048),
    ("meters", "ft", 0.3048),
    ("meters", "inch", 0.0254),
    ("kilograms", "gram", 0.001),
    ("kilograms", "g", 0.001),
    ("kilograms", "tonne", 1000.0),
    ("kilograms", "lb", 0.453592),
    ("kilograms", "pound", 0.453592),
    ("square kilometers", "hectare", 0.01),
    ("square kilometers", "square mile", 2.5899),
    ("square kilometers", "mile²", 2.5899),
];

// ── Normalizer ────────────────────────────────────────────────────────────────

/// Converts user-supplied numeric values into the KG's base units so that
/// later comparisons run against what the KG actually stores.
pub struct UnitNormalizer;

impl UnitNormalizer {
    /// Normalize every constraint in place. Idempotent: the `unit` field is
    /// cleared after conversion, so a second pass finds nothing to do.
    pub fn normalize(constraints: &mut [Constraint]) {
        for c in constraints {
            Self::normalize_one(c);
        }
    }

    fn normalize_one(c: &mut Constraint) {
        let Some(unit) = c.unit.clone() else {
            return;
        };
        let label = c.property_label.to_lowercase();
        let Some(base) = PROPERTY_BASE_UNITS
            .iter()
            .find(|(needle, _)| label.contains(needle))
            .map(|(_, base)| *base)
        else {
            // Property is not quantity-shaped for us; leave the unit attached.
            tracing::warn!(
                id = %c.id,
                unit = %unit,
                label = %c.property_label,
                "no base unit known for property, leaving value untouched"
            );
            return;
        };

        let clean = unit.to_lowercase();
        let clean = clean.trim().trim_end_matches('s');
        if clean == base.trim_end_matches('s') {
            // Already in base units; just drop the tag.
            c.unit = None;
            return;
        }
        let Some(factor) = CONVERSION_FACTORS
            .iter()
            .find(|(b, src, _)| *b == base && *src == clean)
            .map(|(_, _, f)| *f)
        else {
            tracing::warn!(id = %c.id, unit = %unit, base, "unknown source unit, skipping");
            return;
        };

        let Ok(value) = c.value.parse::<f64>() else {
            tracing::warn!(id = %c.id, value = %c.value, "non-numeric value under a unit tag");
            return;
        };

        let converted = value * factor;
        tracing::info!(
            id = %c.id,
            "unit normalized: {value} {unit} -> {converted} {base}"
        );
        c.value = format_number(converted);
        c.unit = None;
    }
}

/// Render without a trailing `.0` for whole numbers so SPARQL literals and
/// traces stay readable.
fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}
