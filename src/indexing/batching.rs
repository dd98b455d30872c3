//! Token-bounded batching of embedding inputs.

/// Rough token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Split `items` into consecutive batches whose summed estimate stays within
/// `ceiling`.
///
/// An item whose own estimate exceeds the ceiling is emitted alone.
/// Concatenating the batches reproduces `items` in order.
pub fn batch_by_token_limit<T, F>(items: Vec<T>, ceiling: usize, text: F) -> Vec<Vec<T>>
where
    F: Fn(&T) -> &str,
{
    let mut batches = Vec::new();
    let mut current: Vec<T> = Vec::new();
    let mut current_tokens = 0usize;

    for item in items {
        let tokens = estimate_tokens(text(&item));

        if tokens > ceiling {
            if !current.is_empty() {
                batches.push(std::mem::take(&mut current));
                current_tokens = 0;
            }
            batches.push(vec![item]);
            continue;
        }

        if current_tokens + tokens > ceiling && !current.is_empty() {
            batches.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current_tokens += tokens;
        current.push(item);
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn batch(texts: &[String], ceiling: usize) -> Vec<Vec<String>> {
        batch_by_token_limit(texts.to_vec(), ceiling, |s| s.as_str())
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        // counts characters, not bytes
        assert_eq!(estimate_tokens("→→→→"), 1);
    }

    #[test]
    fn test_batches_split_at_ceiling() {
        let texts: Vec<String> = (0..5).map(|_| "x".repeat(40)).collect(); // 10 tokens each
        let batches = batch(&texts, 25);
        let sizes: Vec<_> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_exact_fit_stays_in_batch() {
        let texts: Vec<String> = (0..3).map(|_| "x".repeat(40)).collect();
        let batches = batch(&texts, 30);
        assert_eq!(batches.len(), 1);
    }

    #[test]
    fn test_oversized_document_gets_own_batch() {
        let texts = vec![
            "a".repeat(8),
            "b".repeat(400), // 100 tokens
            "c".repeat(8),
        ];
        let batches = batch(&texts, 50);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[1], vec!["b".repeat(400)]);
    }

    #[test]
    fn test_empty_input() {
        assert!(batch(&[], 10).is_empty());
    }

    #[test]
    fn test_random_inputs_respect_ceiling_and_order() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let ceiling = rng.gen_range(1..200);
            let count = rng.gen_range(0..60);
            let texts: Vec<String> = (0..count)
                .map(|i| format!("{i}:{}", "z".repeat(rng.gen_range(0..1000))))
                .collect();

            let batches = batch(&texts, ceiling);

            for b in &batches {
                assert!(!b.is_empty());
                let total: usize = b.iter().map(|t| estimate_tokens(t)).sum();
                assert!(
                    total <= ceiling || b.len() == 1,
                    "batch of {} items totals {} > {}",
                    b.len(),
                    total,
                    ceiling
                );
            }
            let flattened: Vec<String> = batches.into_iter().flatten().collect();
            assert_eq!(flattened, texts);
        }
    }
}
