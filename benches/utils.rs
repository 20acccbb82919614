use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::{Value, json};

const PLANS: &[&str] = &["free", "pro", "team", "enterprise"];
const TAGS: &[&str] = &["beta", "early-adopter", "churn-risk", "vip"];
const MESSAGES: &[&str] = &[
    "I was charged twice this month, can I get a refund?",
    "How do I export my data to CSV?",
    "The dashboard has been loading slowly since yesterday.",
    "Please cancel my subscription and refund the last invoice.",
];

/// Generate n random support-chat contexts to use in the benchmark
pub fn generate_random_contexts(n: usize) -> Vec<Value> {
    let mut rng = StdRng::seed_from_u64(42); // Fixed seed for reproducibility
    let mut contexts = Vec::with_capacity(n);

    for _ in 0..n {
        let tag_count = rng.random_range(0..=TAGS.len());
        let tags: Vec<&str> = (0..tag_count)
            .map(|_| TAGS[rng.random_range(0..TAGS.len())])
            .collect();

        let mut context = json!({
            "user": {
                "name": random_string(&mut rng, 5, 10),
                "plan": PLANS[rng.random_range(0..PLANS.len())],
                "tickets": rng.random_range(0..8),
                "tags": tags,
            },
            "agent": {
                "name": random_string(&mut rng, 4, 8),
                "team": "support",
            },
            "message": MESSAGES[rng.random_range(0..MESSAGES.len())],
        });
        if rng.random_bool(0.5) {
            context["company"] = json!(random_string(&mut rng, 4, 12));
        }
        contexts.push(context);
    }

    contexts
}

/// Generate a random string with length between min and max
fn random_string(rng: &mut StdRng, min_len: usize, max_len: usize) -> String {
    let charset = b"abcdefghijklmnopqrstuvwxyz";
    let len = rng.random_range(min_len..=max_len);

    (0..len)
        .map(|_| char::from(charset[rng.random_range(0..charset.len())]))
        .collect()
}
