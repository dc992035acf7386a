use serde::{Deserialize, Serialize};

use crate::config::CampaignConfig;
use crate::models::{Lead, SequenceTemplate};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub to_email: Option<String>,
    pub subject: String,
    pub body: String,
}

/// Fills `template` for `lead` from the campaign's personalization section
/// and the lead's matched pain points.
pub fn render(template: SequenceTemplate, lead: &Lead, config: &CampaignConfig) -> RenderedMessage {
    let personalization = &config.personalization;
    let business = lead.business_name.as_str();
    let sender = if personalization.sender_name.is_empty() {
        "The team".to_string()
    } else {
        personalization.sender_name.clone()
    };
    let signature = match &personalization.sender_company {
        Some(company) => format!("{sender}\n{company}"),
        None => sender,
    };
    let value_prop = personalization
        .value_propositions
        .first()
        .map(String::as_str)
        .unwrap_or("make it easier for customers to reach you");
    let pain_point = lead.matched_keywords.first().map(String::as_str);

    let (subject, opening) = match template {
        SequenceTemplate::InitialOutreach => (
            format!("A quick idea for {business}"),
            match pain_point {
                Some(pain) => format!(
                    "I noticed a few of your customers mention \"{pain}\". We help teams like yours {}.",
                    lowercase_first(value_prop)
                ),
                None => format!(
                    "We help businesses like {business} {}.",
                    lowercase_first(value_prop)
                ),
            },
        ),
        SequenceTemplate::FollowUp => (
            format!("Re: A quick idea for {business}"),
            "Following up on my last note in case it got buried.".to_string(),
        ),
        SequenceTemplate::ValueAdd => (
            format!("Something useful for {business}"),
            format!(
                "One thing that tends to work well: {}.",
                lowercase_first(value_prop)
            ),
        ),
        SequenceTemplate::SocialProof => (
            format!("How teams near {business} handle this"),
            match pain_point {
                Some(pain) => format!(
                    "Other owners told us \"{pain}\" was costing them customers until they changed how they work."
                ),
                None => "Other owners in your area have seen quick wins with a small change.".to_string(),
            },
        ),
        SequenceTemplate::Breakup => (
            format!("Closing the loop, {business}"),
            "I haven't heard back, so this will be my last email. Reply any time if the timing changes."
                .to_string(),
        ),
    };

    let body = format!("Hi {business} team,\n\n{opening}\n\nBest,\n{signature}");

    RenderedMessage {
        to_email: lead.email.clone(),
        subject,
        body,
    }
}

fn lowercase_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;
    use crate::models::LeadSignals;
    use uuid::Uuid;

    fn lead() -> Lead {
        let mut lead = Lead::new(
            Uuid::new_v4(),
            "Bright Smiles",
            Some("hi@brightsmiles.example".to_string()),
            LeadSignals::default(),
        );
        lead.matched_keywords = vec!["wait time".to_string()];
        lead
    }

    #[test]
    fn initial_outreach_mentions_pain_point() {
        let message = render(SequenceTemplate::InitialOutreach, &lead(), &sample_config());
        assert_eq!(message.to_email.as_deref(), Some("hi@brightsmiles.example"));
        assert_eq!(message.subject, "A quick idea for Bright Smiles");
        assert!(message.body.contains("\"wait time\""));
        assert!(message.body.contains("fill empty chairs with online booking"));
        assert!(message.body.ends_with("Sam"));
    }

    #[test]
    fn breakup_without_email_still_renders() {
        let mut lead = lead();
        lead.email = None;
        let message = render(SequenceTemplate::Breakup, &lead, &sample_config());
        assert!(message.to_email.is_none());
        assert!(message.subject.starts_with("Closing the loop"));
    }
}
