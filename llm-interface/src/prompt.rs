use crate::client::ChatMessage;
use threadcraft_core::ScoringCandidate;

/// Body text beyond this many characters is cut before prompting.
const MAX_BODY_CHARS: usize = 2_000;

pub const SCORING_SYSTEM_PROMPT: &str = "\
You evaluate whether a discussion thread is a natural place for a business to join the conversation.

Score relevance on a scale from 0.0 to 1.0:
- 0.8-1.0: perfect fit, the thread asks for exactly what the business offers
- 0.6-0.8: good fit, a helpful mention would be welcome
- 0.4-0.6: moderate fit, related topic but the mention would feel forced
- 0.2-0.4: weak fit, only loosely connected
- 0.0-0.2: not relevant

Classify the thread as exactly one postType:
- showcase: the author is presenting their own work or product
- question: the author is asking for help or recommendations
- discussion: open-ended conversation about a topic

Respond with a single JSON object and nothing else:
{\"relevance\": <number>, \"reasoning\": \"<one or two sentences>\", \"postType\": \"showcase\" | \"question\" | \"discussion\"}";

pub fn build_scoring_messages(candidate: &ScoringCandidate) -> Vec<ChatMessage> {
    let business = &candidate.business;
    let mut user = format!(
        "Business: {}\nDescription: {}\n",
        business.name, business.description
    );
    if !business.keywords.is_empty() {
        user.push_str(&format!("Keywords: {}\n", business.keywords.join(", ")));
    }

    user.push_str(&format!(
        "\nThread in r/{}\nURL: {}\nTitle: {}\n",
        candidate.subreddit, candidate.url, candidate.title
    ));
    if let Some(body) = candidate.body.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
        let excerpt: String = body.chars().take(MAX_BODY_CHARS).collect();
        user.push_str(&format!("Body:\n{}\n", excerpt));
    }

    vec![
        ChatMessage::system(SCORING_SYSTEM_PROMPT),
        ChatMessage::user(user),
    ]
}
