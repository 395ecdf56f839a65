//! A small handler based generative layer.
//!
//! A [`Model`] is ordinary Rust code that calls [`Handler::sample`] at each random
//! choice. The handler decides what a choice means: [`Simulator`] draws fresh values,
//! [`Assessor`] scores a fixed choice map and [`Updater`] replays a previous execution
//! under new constraints. Proposals are models whose argument is the current trace.

use std::collections::BTreeSet;
use std::sync::Arc;

use rand::Rng;

use crate::address::Address;
use crate::choices::ChoiceMap;
use crate::distributions::Distribution;
use crate::trace::{read_choice, ArgDiff, Trace, TraceError, TraceUpdate};

/// Interprets the random choices of a model.
pub trait Handler {
    fn sample<D: Distribution>(
        &mut self,
        addr: impl Into<Address>,
        dist: &D,
        params: D::Params,
    ) -> Result<D::Value, TraceError>;
}

pub trait Model: Send + Sync {
    type Args;

    fn run<H: Handler>(&self, args: &Self::Args, handler: &mut H) -> Result<(), TraceError>;
}

fn score<D: Distribution>(
    addr: &Address,
    dist: &D,
    value: &D::Value,
    params: &D::Params,
) -> Result<f64, TraceError> {
    dist.log_density(value, params)
        .map_err(|source| TraceError::Distribution {
            addr: addr.clone(),
            source,
        })
}

/// Draws every choice that is not constrained.
///
/// `weight` accumulates the log density of the constrained choices.
pub struct Simulator<'a, R: Rng + ?Sized> {
    rng: &'a mut R,
    constraints: Option<&'a ChoiceMap>,
    used: usize,
    choices: ChoiceMap,
    score: f64,
    weight: f64,
}

impl<'a, R: Rng + ?Sized> Simulator<'a, R> {
    pub fn new(rng: &'a mut R) -> Self {
        Simulator {
            rng,
            constraints: None,
            used: 0,
            choices: ChoiceMap::new(),
            score: 0.,
            weight: 0.,
        }
    }

    pub fn with_constraints(rng: &'a mut R, constraints: &'a ChoiceMap) -> Self {
        Simulator {
            constraints: Some(constraints),
            ..Simulator::new(rng)
        }
    }

    /// `(choices, score, weight)`, failing if a constraint was never visited.
    pub fn finish(self) -> Result<(ChoiceMap, f64, f64), TraceError> {
        if let Some(constraints) = self.constraints {
            if self.used != constraints.len() {
                if let Some(addr) = constraints.addresses().find(|a| !self.choices.contains(a)) {
                    return Err(TraceError::Unconsumed(addr.clone()));
                }
            }
        }
        Ok((self.choices, self.score, self.weight))
    }
}

impl<R: Rng + ?Sized> Handler for Simulator<'_, R> {
    fn sample<D: Distribution>(
        &mut self,
        addr: impl Into<Address>,
        dist: &D,
        params: D::Params,
    ) -> Result<D::Value, TraceError> {
        let addr = addr.into();
        if self.choices.contains(&addr) {
            return Err(TraceError::Duplicate(addr));
        }
        let constrained = self.constraints.filter(|c| c.contains(&addr));
        let value = match constrained {
            Some(constraints) => {
                self.used += 1;
                read_choice::<D::Value>(constraints, &addr)?
            }
            None => dist
                .sample(&mut *self.rng, &params)
                .map_err(|source| TraceError::Distribution {
                    addr: addr.clone(),
                    source,
                })?,
        };
        let logp = score(&addr, dist, &value, &params)?;
        self.score += logp;
        if constrained.is_some() {
            self.weight += logp;
        }
        self.choices.set(addr, value.clone());
        Ok(value)
    }
}

/// Scores a complete choice map. Every address must be visited exactly once.
pub struct Assessor<'a> {
    choices: &'a ChoiceMap,
    visited: BTreeSet<Address>,
    score: f64,
}

impl<'a> Assessor<'a> {
    pub fn new(choices: &'a ChoiceMap) -> Self {
        Assessor {
            choices,
            visited: BTreeSet::new(),
            score: 0.,
        }
    }

    pub fn finish(self) -> Result<f64, TraceError> {
        if let Some(addr) = self.choices.addresses().find(|a| !self.visited.contains(*a)) {
            return Err(TraceError::Unconsumed(addr.clone()));
        }
        Ok(self.score)
    }
}

impl Handler for Assessor<'_> {
    fn sample<D: Distribution>(
        &mut self,
        addr: impl Into<Address>,
        dist: &D,
        params: D::Params,
    ) -> Result<D::Value, TraceError> {
        let addr = addr.into();
        let value = read_choice::<D::Value>(self.choices, &addr)?;
        self.score += score(&addr, dist, &value, &params)?;
        if !self.visited.insert(addr.clone()) {
            return Err(TraceError::Duplicate(addr));
        }
        Ok(value)
    }
}

/// Replays a previous execution with some choices replaced. Deterministic.
pub struct Updater<'a> {
    previous: &'a ChoiceMap,
    constraints: &'a ChoiceMap,
    used: usize,
    choices: ChoiceMap,
    score: f64,
}

impl<'a> Updater<'a> {
    pub fn new(previous: &'a ChoiceMap, constraints: &'a ChoiceMap) -> Self {
        Updater {
            previous,
            constraints,
            used: 0,
            choices: ChoiceMap::new(),
            score: 0.,
        }
    }

    /// `(choices, score, discard)`
    pub fn finish(self) -> Result<(ChoiceMap, f64, ChoiceMap), TraceError> {
        if self.used != self.constraints.len() {
            if let Some(addr) = self
                .constraints
                .addresses()
                .find(|a| !self.choices.contains(a))
            {
                return Err(TraceError::Unconsumed(addr.clone()));
            }
        }
        let discard = self
            .previous
            .iter()
            .filter(|(addr, _)| self.constraints.contains(addr) || !self.choices.contains(addr))
            .map(|(addr, value)| (addr.clone(), value.clone()))
            .collect();
        Ok((self.choices, self.score, discard))
    }
}

impl Handler for Updater<'_> {
    fn sample<D: Distribution>(
        &mut self,
        addr: impl Into<Address>,
        dist: &D,
        params: D::Params,
    ) -> Result<D::Value, TraceError> {
        let addr = addr.into();
        if self.choices.contains(&addr) {
            return Err(TraceError::Duplicate(addr));
        }
        let value = if self.constraints.contains(&addr) {
            self.used += 1;
            read_choice::<D::Value>(self.constraints, &addr)?
        } else if self.previous.contains(&addr) {
            read_choice::<D::Value>(self.previous, &addr)?
        } else {
            return Err(TraceError::Unconstrained(addr));
        };
        self.score += score(&addr, dist, &value, &params)?;
        self.choices.set(addr, value.clone());
        Ok(value)
    }
}

/// Trace of a [`Model`], with its choices shared between copies.
pub struct ChoiceTrace<M: Model> {
    model: Arc<M>,
    args: Arc<M::Args>,
    choices: Arc<ChoiceMap>,
    score: f64,
}

impl<M: Model> Clone for ChoiceTrace<M> {
    fn clone(&self) -> Self {
        ChoiceTrace {
            model: self.model.clone(),
            args: self.args.clone(),
            choices: self.choices.clone(),
            score: self.score,
        }
    }
}

impl<M: Model> std::fmt::Debug for ChoiceTrace<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChoiceTrace")
            .field("choices", &self.choices)
            .field("score", &self.score)
            .finish()
    }
}

impl<M: Model> ChoiceTrace<M> {
    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn args(&self) -> &M::Args {
        &self.args
    }
}

impl<M: Model> Trace for ChoiceTrace<M>
where
    M::Args: Send + Sync,
{
    fn choices(&self) -> &ChoiceMap {
        &self.choices
    }

    fn score(&self) -> f64 {
        self.score
    }

    fn update(&self, constraints: &ChoiceMap, _diff: ArgDiff) -> Result<TraceUpdate<Self>, TraceError> {
        let mut updater = Updater::new(&self.choices, constraints);
        self.model.run(&self.args, &mut updater)?;
        let (choices, score, discard) = updater.finish()?;
        let trace = ChoiceTrace {
            model: self.model.clone(),
            args: self.args.clone(),
            choices: Arc::new(choices),
            score,
        };
        Ok(TraceUpdate {
            weight: score - self.score,
            trace,
            discard,
        })
    }
}

/// Run `model` forward, drawing every choice.
pub fn simulate<M: Model, R: Rng + ?Sized>(
    model: Arc<M>,
    args: M::Args,
    rng: &mut R,
) -> Result<ChoiceTrace<M>, TraceError> {
    let (trace, _) = generate(model, args, &ChoiceMap::new(), rng)?;
    Ok(trace)
}

/// Run `model` with some choices fixed to `constraints`.
///
/// Returns the trace and the log density of the constrained choices.
pub fn generate<M: Model, R: Rng + ?Sized>(
    model: Arc<M>,
    args: M::Args,
    constraints: &ChoiceMap,
    rng: &mut R,
) -> Result<(ChoiceTrace<M>, f64), TraceError> {
    let mut simulator = Simulator::with_constraints(rng, constraints);
    model.run(&args, &mut simulator)?;
    let (choices, score, weight) = simulator.finish()?;
    let trace = ChoiceTrace {
        model,
        args: Arc::new(args),
        choices: Arc::new(choices),
        score,
    };
    Ok((trace, weight))
}

/// Sample the choices of a proposal together with their log density.
pub fn propose<M: Model, R: Rng + ?Sized>(
    model: &M,
    args: &M::Args,
    rng: &mut R,
) -> Result<(ChoiceMap, f64), TraceError> {
    let mut simulator = Simulator::new(rng);
    model.run(args, &mut simulator)?;
    let (choices, score, _) = simulator.finish()?;
    Ok((choices, score))
}

/// Log density of a complete set of choices.
pub fn assess<M: Model>(model: &M, args: &M::Args, choices: &ChoiceMap) -> Result<f64, TraceError> {
    let mut assessor = Assessor::new(choices);
    model.run(args, &mut assessor)?;
    assessor.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{Bernoulli, Normal, Poisson};
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// `n ~ Poisson(2)`, `x_i ~ Normal(mu, 1)` for `i < n`, `flag ~ Bernoulli(0.3)`.
    struct Varying;

    impl Model for Varying {
        type Args = f64;

        fn run<H: Handler>(&self, mu: &f64, h: &mut H) -> Result<(), TraceError> {
            let n = h.sample("n", &Poisson, 2.)?;
            for i in 0..n {
                h.sample(("x", i), &Normal, (*mu, 1.))?;
            }
            h.sample("flag", &Bernoulli, 0.3)?;
            Ok(())
        }
    }

    fn fixed(n: i64) -> ChoiceMap {
        let mut choices = ChoiceMap::new().with("n", n).with("flag", true);
        for i in 0..n {
            choices.set(("x", i), i as f64 * 0.5);
        }
        choices
    }

    #[test]
    fn simulate_scores_match_assess() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let model = Arc::new(Varying);
        for _ in 0..20 {
            let trace = simulate(model.clone(), 0.5, &mut rng).unwrap();
            let lp = assess(&Varying, &0.5, trace.choices()).unwrap();
            assert!((lp - trace.score()).abs() < 1e-12);
        }
    }

    #[test]
    fn assess_reports_malformed_choices() {
        let mut missing = fixed(2);
        missing.remove(&("x", 1i64).into());
        assert_eq!(
            assess(&Varying, &0., &missing),
            Err(TraceError::Missing(("x", 1i64).into()))
        );

        let extra = fixed(1).with("extra", 1.);
        assert_eq!(
            assess(&Varying, &0., &extra),
            Err(TraceError::Unconsumed("extra".into()))
        );

        let wrong = fixed(0).with("n", 1.5);
        assert!(matches!(
            assess(&Varying, &0., &wrong),
            Err(TraceError::WrongType { .. })
        ));
    }

    #[test]
    fn generate_weight_is_constrained_density() {
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let constraints = ChoiceMap::new().with("n", 1i64).with(("x", 0i64), 0.25);
        let (trace, weight) = generate(Arc::new(Varying), 0., &constraints, &mut rng).unwrap();
        let expected = Poisson.log_density(&1, &2.).unwrap()
            + Normal.log_density(&0.25, &(0., 1.)).unwrap();
        assert!((weight - expected).abs() < 1e-12);
        assert_eq!(trace.get_as::<f64>(&("x", 0i64).into()), Ok(0.25));

        let stray = ChoiceMap::new().with("n", 0i64).with(("x", 0i64), 0.25);
        assert_eq!(
            generate(Arc::new(Varying), 0., &stray, &mut rng).map(|_| ()),
            Err(TraceError::Unconsumed(("x", 0i64).into()))
        );
    }

    #[test]
    fn update_shrinks_and_grows() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let model = Arc::new(Varying);
        let (trace, _) = generate(model, 0., &fixed(3), &mut rng).unwrap();

        let shrink = trace
            .update(&ChoiceMap::new().with("n", 1i64), ArgDiff::NoChange)
            .unwrap();
        assert_eq!(
            shrink.discard,
            ChoiceMap::new()
                .with("n", 3i64)
                .with(("x", 1i64), 0.5)
                .with(("x", 2i64), 1.0)
        );
        assert!((shrink.weight - (shrink.trace.score() - trace.score())).abs() < 1e-12);

        let grow = shrink.trace.update(&ChoiceMap::new().with("n", 2i64), ArgDiff::NoChange);
        assert_eq!(
            grow.map(|_| ()),
            Err(TraceError::Unconstrained(("x", 1i64).into()))
        );

        let regrow = shrink
            .trace
            .update(&shrink.discard, ArgDiff::Unknown)
            .unwrap();
        assert!(regrow.trace.choices().approx_eq(trace.choices(), 0.));
        assert!((regrow.weight + shrink.weight).abs() < 1e-12);
    }
}
