use serde::Serialize;
use strsim;

use crate::models::core::Company;

/// Candidates need a combined score above this to be reported at all.
const CANDIDATE_FLOOR: f32 = 60.0;
/// Top candidate at or above this is accepted without creating a new record.
pub const ACCEPT_THRESHOLD: f32 = 80.0;

const EMAIL_WEIGHT: f32 = 0.6;
const NAME_WEIGHT: f32 = 0.3;
/// Exact phone match is a strong independent corroborator; the bonus is
/// unscaled and may push a score past the per-field caps.
const PHONE_BONUS: f32 = 40.0;

const MAX_CANDIDATES: usize = 3;

#[derive(Clone, Debug)]
pub struct ContactInput {
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
}

impl ContactInput {
    pub fn new(email: &str, name: &str, phone: Option<&str>) -> Self {
        Self {
            email: email.to_string(),
            name: name.to_string(),
            phone: phone.map(|p| p.to_string()),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub company_id: String,
    pub confidence: f32,
    pub reasons: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct Attribution {
    pub exact_match: Option<Company>,
    pub candidates: Vec<Candidate>,
    pub should_create_new: bool,
}

/// Lowercase, strip dots in the local part, strip a `+tag` suffix. Provider
/// aliasing rules mean these variants usually belong to the same inbox.
pub fn normalize_email(raw: &str) -> String {
    let email = raw.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) => {
            let local = local.split_once('+').map(|(base, _)| base).unwrap_or(local);
            let local: String = local.chars().filter(|c| *c != '.').collect();
            format!("{}@{}", local, domain)
        }
        None => email,
    }
}

/// Lowercase, letters and spaces only, runs of whitespace collapsed.
pub fn normalize_name(raw: &str) -> String {
    let kept: String = raw
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphabetic() || c.is_whitespace())
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn email_similarity(a: &str, b: &str) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 100.0;
    }
    let (a_local, a_domain) = match a.split_once('@') {
        Some(parts) => parts,
        None => return 0.0,
    };
    let (b_local, b_domain) = match b.split_once('@') {
        Some(parts) => parts,
        None => return 0.0,
    };
    if a_domain != b_domain {
        return 0.0;
    }
    if !a_local.is_empty() && !b_local.is_empty() &&
        (a_local.contains(b_local) || b_local.contains(a_local))
    {
        return 85.0;
    }
    50.0
}

fn name_similarity(a: &str, b: &str) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 100.0;
    }
    if a.contains(b) || b.contains(a) {
        return 80.0;
    }
    let a_first = a.split_whitespace().next().unwrap_or("");
    let b_first = b.split_whitespace().next().unwrap_or("");
    if a_first == b_first && a_first.len() > 2 {
        return 60.0;
    }
    (strsim::sorensen_dice(a, b) as f32) * 100.0
}

/// Weighted confidence for one stored identity against the inbound contact.
pub fn calculate_confidence(input: &ContactInput, company: &Company) -> (f32, Vec<String>) {
    let mut reasons = Vec::new();

    let input_email = normalize_email(&input.email);
    let stored_email = company.email.as_deref().map(normalize_email).unwrap_or_default();
    let email_score = email_similarity(&input_email, &stored_email);
    if email_score > 0.0 {
        reasons.push(format!("email similarity {:.0}", email_score));
    }

    let input_name = normalize_name(&input.name);
    let stored_name = normalize_name(&company.name);
    let name_score = name_similarity(&input_name, &stored_name);
    if name_score > 0.0 {
        reasons.push(format!("name similarity {:.0}", name_score));
    }

    let mut confidence = email_score * EMAIL_WEIGHT + name_score * NAME_WEIGHT;

    if let (Some(input_phone), Some(stored_phone)) = (&input.phone, &company.phone) {
        let input_digits = normalize_phone(input_phone);
        let stored_digits = normalize_phone(stored_phone);
        if !input_digits.is_empty() && input_digits == stored_digits {
            confidence += PHONE_BONUS;
            reasons.push("exact phone match".to_string());
        }
    }

    (confidence.min(100.0).round(), reasons)
}

/// Attribute an inbound contact to known identities. Never errors: "nothing
/// matched" is the `should_create_new` branch, not a failure.
pub fn resolve(input: &ContactInput, companies: &[Company]) -> Attribution {
    let input_email = input.email.trim().to_lowercase();

    if !input_email.is_empty() {
        let exact = companies.iter().find(|c| {
            c.email
                .as_deref()
                .map(|e| e.trim().to_lowercase() == input_email)
                .unwrap_or(false)
        });
        if let Some(company) = exact {
            return Attribution {
                exact_match: Some(company.clone()),
                candidates: vec![Candidate {
                    company_id: company.id.clone(),
                    confidence: 100.0,
                    reasons: vec!["exact email match".to_string()],
                }],
                should_create_new: false,
            };
        }
    }

    let mut candidates: Vec<Candidate> = companies
        .iter()
        .filter_map(|company| {
            let (confidence, reasons) = calculate_confidence(input, company);
            if confidence > CANDIDATE_FLOOR {
                Some(Candidate {
                    company_id: company.id.clone(),
                    confidence,
                    reasons,
                })
            } else {
                None
            }
        })
        .collect();

    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    candidates.truncate(MAX_CANDIDATES);

    let top = candidates.first().map(|c| c.confidence).unwrap_or(0.0);
    let should_create_new = top < ACCEPT_THRESHOLD;

    Attribution {
        exact_match: None,
        candidates,
        should_create_new,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn company(name: &str, email: Option<&str>, phone: Option<&str>) -> Company {
        Company::new(name, email, phone)
    }

    #[test]
    fn email_normalization_strips_dots_and_plus_tags() {
        assert_eq!(normalize_email(" A.Smith+promo@Gmail.com "), "asmith@gmail.com");
        assert_eq!(normalize_email("a.smith@gmail.com"), "asmith@gmail.com");
        assert_eq!(normalize_email("not-an-email"), "not-an-email");
    }

    #[test]
    fn name_normalization_keeps_letters_and_collapses_whitespace() {
        assert_eq!(normalize_name("  Alice   Smith-Jones 3rd "), "alice smithjones rd");
        assert_eq!(normalize_name("ALICE"), "alice");
    }

    #[test]
    fn exact_email_match_short_circuits_with_confidence_100() {
        let known = vec![
            company("Alice Smith Design", Some("a.smith@gmail.com"), None),
            company("Unrelated Co", Some("bob@other.com"), None)
        ];
        let input = ContactInput::new("A.Smith@gmail.com", "Completely Different Name", None);
        let result = resolve(&input, &known);

        let exact = result.exact_match.expect("expected an exact match");
        assert_eq!(exact.id, known[0].id);
        assert_eq!(result.candidates[0].confidence, 100.0);
        assert!(!result.should_create_new);
    }

    #[test]
    fn alias_of_same_inbox_scores_full_email_points_without_exact_match() {
        let known = vec![company("Alice Smith", Some("a.smith@gmail.com"), None)];
        let input = ContactInput::new("asmith+site@gmail.com", "Alice Smith", None);
        let result = resolve(&input, &known);

        assert!(result.exact_match.is_none());
        let top = &result.candidates[0];
        // 100 * 0.6 for the normalized-equal email plus 100 * 0.3 for the name.
        assert_eq!(top.confidence, 90.0);
        assert!(!result.should_create_new);
    }

    #[test]
    fn same_domain_alone_is_not_enough_to_reuse_an_identity() {
        let known = vec![company("Front Desk", Some("hello@atelier.co"), None)];
        let input = ContactInput::new("billing@atelier.co", "Someone Else", None);
        let result = resolve(&input, &known);

        assert!(result.exact_match.is_none());
        // 50 * 0.6 = 30, below the candidate floor.
        assert!(result.candidates.is_empty());
        assert!(result.should_create_new);
    }

    #[test]
    fn confidence_is_monotonic_as_signals_are_added() {
        let stored = company("Alice Smith", Some("alice@studio.dev"), Some("+1 (555) 010-2030"));

        let email_only = ContactInput::new("alice+new@studio.dev", "zzz", None);
        let email_and_name = ContactInput::new("alice+new@studio.dev", "Alice Smith", None);
        let all_signals = ContactInput::new(
            "alice+new@studio.dev",
            "Alice Smith",
            Some("15550102030")
        );

        let (a, _) = calculate_confidence(&email_only, &stored);
        let (b, _) = calculate_confidence(&email_and_name, &stored);
        let (c, _) = calculate_confidence(&all_signals, &stored);
        assert!(a <= b);
        assert!(b <= c);
        assert_eq!(c, 100.0);
    }

    #[test]
    fn phone_bonus_can_push_past_field_caps() {
        let stored = company("The Print Shop", Some("orders@print.shop"), Some("555-777-8888"));
        // Same domain only (50 * 0.6 = 30) plus the flat phone bonus.
        let input = ContactInput::new("front@print.shop", "no overlap", Some("5557778888"));
        let (score, reasons) = calculate_confidence(&input, &stored);
        assert_eq!(score, 70.0);
        assert!(reasons.iter().any(|r| r.contains("phone")));
    }

    #[test]
    fn returns_top_three_candidates_sorted_descending() {
        let mut known = Vec::new();
        for i in 0..5 {
            let name = format!("Alice Smith {}", i);
            let email = format!("alice{}@x{}.com", i, i);
            known.push(company(&name, Some(email.as_str()), None));
        }
        // Name containment (80 * 0.3 = 24) alone never crosses the floor, so
        // seed emails on the same domain as the input for three of them.
        known[0].email = Some("alice.smith@studio.dev".to_string());
        known[1].email = Some("alicesmith@studio.dev".to_string());
        known[2].email = Some("reception@studio.dev".to_string());

        let input = ContactInput::new("alice@studio.dev", "Alice Smith", None);
        let result = resolve(&input, &known);

        assert!(result.candidates.len() <= 3);
        for pair in result.candidates.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
    }

    #[test]
    fn should_create_new_when_top_candidate_is_below_accept_threshold() {
        let known = vec![company("Alice Smith", Some("alice@one.com"), None)];
        // Name-only overlap: 100 * 0.3 = 30, no candidate survives the floor.
        let input = ContactInput::new("alice@two.com", "Alice Smith", None);
        let result = resolve(&input, &known);
        assert!(result.exact_match.is_none());
        assert!(result.should_create_new);
    }

    #[test]
    fn no_known_identities_always_creates() {
        let input = ContactInput::new("new@client.com", "New Client", None);
        let result = resolve(&input, &[]);
        assert!(result.exact_match.is_none());
        assert!(result.candidates.is_empty());
        assert!(result.should_create_new);
    }
}
