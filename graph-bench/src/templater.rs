//! Per-request query rendering.

use rand::Rng;

use crate::workload::{RandomIntBounds, TermSelection, TermSource, WorkloadSpec};

/// Token replaced by a fresh random integer on every occurrence
pub const RAND_INT_PLACEHOLDER: &str = "__rand_int__";

/// Renders templates into concrete query text
#[derive(Debug, Clone, Copy)]
pub struct Templater<'a> {
    random_ints: RandomIntBounds,
    terms: Option<&'a TermSource>,
}

impl<'a> Templater<'a> {
    pub fn new(random_ints: RandomIntBounds, terms: Option<&'a TermSource>) -> Self {
        Self { random_ints, terms }
    }

    pub fn for_spec(spec: &'a WorkloadSpec) -> Self {
        Self::new(spec.random_ints, spec.terms.as_ref())
    }

    /// Substitute named terms for request `ordinal`, then every random int
    /// token with an independent draw
    pub fn render<R: Rng + ?Sized>(&self, template: &str, ordinal: u64, rng: &mut R) -> String {
        let mut query = template.to_string();

        if let Some(terms) = self.terms {
            let record = terms.record(record_index(terms, ordinal, rng));
            for (placeholder, value) in terms.placeholders().iter().zip(record) {
                if query.contains(placeholder.as_str()) {
                    query = query.replace(placeholder.as_str(), value);
                }
            }
        }

        while let Some(pos) = query.find(RAND_INT_PLACEHOLDER) {
            let value = rng.gen_range(self.random_ints.min..self.random_ints.max);
            query.replace_range(pos..pos + RAND_INT_PLACEHOLDER.len(), &value.to_string());
        }

        query
    }
}

fn record_index<R: Rng + ?Sized>(terms: &TermSource, ordinal: u64, rng: &mut R) -> usize {
    match terms.selection() {
        TermSelection::Seq => (ordinal % terms.len() as u64) as usize,
        TermSelection::Rand => rng.gen_range(0..terms.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn bounds(min: i64, max: i64) -> RandomIntBounds {
        RandomIntBounds::new(min, max).unwrap()
    }

    #[test]
    fn test_two_rand_int_tokens_get_independent_values() {
        let templater = Templater::new(bounds(1, 10), None);
        let mut rng = StdRng::seed_from_u64(3);

        let mut saw_different = false;
        for _ in 0..50 {
            let rendered = templater.render("MATCH (a {id: __rand_int__}), (b {id: __rand_int__})", 0, &mut rng);
            assert!(!rendered.contains(RAND_INT_PLACEHOLDER));

            let values: Vec<i64> = rendered
                .split(|c: char| !c.is_ascii_digit())
                .filter(|s| !s.is_empty())
                .map(|s| s.parse().unwrap())
                .collect();
            assert_eq!(values.len(), 2, "rendered: {}", rendered);
            assert!(values.iter().all(|v| (1..10).contains(v)));
            saw_different |= values[0] != values[1];
        }
        assert!(saw_different, "draws should not be shared between tokens");
    }

    #[test]
    fn test_sequential_terms_follow_ordinal() {
        let terms = TermSource::parse("__name__\nalice\nbob\ncarol\n", TermSelection::Seq).unwrap();
        let templater = Templater::new(bounds(0, 1), Some(&terms));
        let mut rng = StdRng::seed_from_u64(1);

        assert_eq!(templater.render("RETURN '__name__'", 0, &mut rng), "RETURN 'alice'");
        assert_eq!(templater.render("RETURN '__name__'", 4, &mut rng), "RETURN 'bob'");
        assert_eq!(templater.render("RETURN '__name__'", 5, &mut rng), "RETURN 'carol'");
    }

    #[test]
    fn test_every_occurrence_of_a_term_is_replaced() {
        let terms = TermSource::parse("__a__,__b__\nx,y\n", TermSelection::Seq).unwrap();
        let templater = Templater::new(bounds(0, 1), Some(&terms));
        let mut rng = StdRng::seed_from_u64(1);

        let rendered = templater.render("__a__ __b__ __a__", 0, &mut rng);
        assert_eq!(rendered, "x y x");
    }

    #[test]
    fn test_terms_are_substituted_before_rand_ints() {
        // the term value itself carries a rand int token
        let terms = TermSource::parse("__id__\n__rand_int__\n", TermSelection::Seq).unwrap();
        let templater = Templater::new(bounds(5, 6), Some(&terms));
        let mut rng = StdRng::seed_from_u64(1);

        assert_eq!(templater.render("RETURN __id__", 0, &mut rng), "RETURN 5");
    }

    #[test]
    fn test_random_term_selection_stays_in_range() {
        let terms = TermSource::parse("__v__\n1\n2\n3\n", TermSelection::Rand).unwrap();
        let templater = Templater::new(bounds(0, 1), Some(&terms));
        let mut rng = StdRng::seed_from_u64(99);

        for ordinal in 0..100 {
            let rendered = templater.render("__v__", ordinal, &mut rng);
            assert!(["1", "2", "3"].contains(&rendered.as_str()));
        }
    }
}
