//! In-process island search used by the CLI, benches and unit tests.
//!
//! Each island hill-climbs a sum of basis terms against a hidden target
//! function sampled on a fixed grid. Islands advance in parallel and every
//! proposal is logged to a free-text diary in the format the diary scanner
//! reads.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use log::{debug, warn};
use rand::prelude::*;
use rand_distr::StandardNormal;
use rayon::prelude::*;

use crate::schema::{ParetoEntry, RunConfig};

use super::backend::{ConfigurationError, QueryError, RetentionPolicy, SearchBackend, StepError};
use super::diary::DIARY_TIME_FORMAT;

/// File name of the diary inside the work directory.
pub const DIARY_FILE_NAME: &str = "diary.txt";

const SAMPLE_POINTS: usize = 64;
const SAMPLE_RANGE: (f64, f64) = (-2.0, 2.0);
const MAX_TERMS: usize = 6;
const MAX_IDEAS: usize = 16;
const BASE_MUTATION_SCALE: f64 = 0.25;

/// Building block of a candidate expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Basis {
    Const,
    X,
    X2,
    X3,
    Sin,
    Cos,
}

impl Basis {
    const ALL: [Basis; 6] = [
        Basis::Const,
        Basis::X,
        Basis::X2,
        Basis::X3,
        Basis::Sin,
        Basis::Cos,
    ];

    fn eval(self, x: f64) -> f64 {
        match self {
            Basis::Const => 1.0,
            Basis::X => x,
            Basis::X2 => x * x,
            Basis::X3 => x * x * x,
            Basis::Sin => x.sin(),
            Basis::Cos => x.cos(),
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Basis::Const => "",
            Basis::X => "x1",
            Basis::X2 => "x1**2",
            Basis::X3 => "x1**3",
            Basis::Sin => "sin(x1)",
            Basis::Cos => "cos(x1)",
        }
    }
}

/// Weighted basis term.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Term {
    pub basis: Basis,
    pub coef: f64,
}

impl Term {
    pub fn new(basis: Basis, coef: f64) -> Self {
        Self { basis, coef }
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    terms: Vec<Term>,
    score: f64,
}

impl Candidate {
    fn expression(&self) -> String {
        render(&self.terms)
    }
}

fn render(terms: &[Term]) -> String {
    if terms.is_empty() {
        return "0".to_owned();
    }
    terms
        .iter()
        .map(|t| match t.basis {
            Basis::Const => format!("{:.3}", t.coef),
            basis => format!("{:.3}*{}", t.coef, basis.symbol()),
        })
        .collect::<Vec<_>>()
        .join(" + ")
}

/// Target samples shared read-only by all islands.
#[derive(Debug)]
struct Dataset {
    xs: Vec<f64>,
    ys: Vec<f64>,
    variance: f64,
}

impl Dataset {
    fn sample(target: &[Term]) -> Self {
        let (lo, hi) = SAMPLE_RANGE;
        let xs: Vec<f64> = (0..SAMPLE_POINTS)
            .map(|i| lo + (hi - lo) * i as f64 / (SAMPLE_POINTS - 1) as f64)
            .collect();
        let ys: Vec<f64> = xs.iter().map(|&x| evaluate(target, x)).collect();
        let mean = ys.iter().sum::<f64>() / ys.len() as f64;
        let variance = ys.iter().map(|y| (y - mean).powi(2)).sum::<f64>() / ys.len() as f64;
        Self {
            xs,
            ys,
            variance: variance.max(f64::EPSILON),
        }
    }

    /// Coefficient of determination as a percentage, floored at 0.
    fn score(&self, terms: &[Term]) -> f64 {
        let mse = self
            .xs
            .iter()
            .zip(&self.ys)
            .map(|(&x, &y)| (evaluate(terms, x) - y).powi(2))
            .sum::<f64>()
            / self.xs.len() as f64;
        let score = 100.0 * (1.0 - mse / self.variance);
        if score.is_finite() { score.max(0.0) } else { 0.0 }
    }
}

fn evaluate(terms: &[Term], x: f64) -> f64 {
    terms.iter().map(|t| t.coef * t.basis.eval(x)).sum()
}

#[derive(Debug)]
struct Island {
    id: usize,
    rng: StdRng,
    best: Option<Candidate>,
    ideas: Vec<Candidate>,
}

impl Island {
    /// Run one mutate-and-evaluate round per proposal. Returns the example
    /// expression each proposal started from, one entry per model call.
    fn evolve(&mut self, data: &Dataset, sampling: &Sampling) -> Vec<String> {
        let mut prompts = Vec::with_capacity(sampling.proposals);
        for _ in 0..sampling.proposals {
            let parent = self.pick_example(sampling);
            prompts.push(render(&parent));

            let terms = self.mutate(parent, sampling.mutation_scale);
            let candidate = Candidate {
                score: data.score(&terms),
                terms,
            };

            if candidate.score >= sampling.hand_over {
                self.ideas.push(candidate.clone());
                if self.ideas.len() > MAX_IDEAS {
                    self.ideas.remove(0);
                }
            }
            let improved = self
                .best
                .as_ref()
                .is_none_or(|best| candidate.score > best.score);
            if improved {
                self.best = Some(candidate);
            }
        }
        prompts
    }

    /// Boltzmann draw over the top `examples` ideas, falling back to the island best.
    fn pick_example(&mut self, sampling: &Sampling) -> Vec<Term> {
        let mut pool: Vec<&Candidate> = self.ideas.iter().collect();
        pool.sort_by(|a, b| b.score.total_cmp(&a.score));
        pool.truncate(sampling.examples);

        let top = pool.first().map_or(0.0, |c| c.score);
        let temperature = f64::from(sampling.sample_temperature);
        pool.choose_weighted(&mut self.rng, |c| ((c.score - top) / temperature).exp())
            .ok()
            .copied()
            .or(self.best.as_ref())
            .map(|c| c.terms.clone())
            .unwrap_or_default()
    }

    fn mutate(&mut self, mut terms: Vec<Term>, scale: f64) -> Vec<Term> {
        let roll: f64 = self.rng.r#gen();
        if terms.is_empty() || (roll < 0.3 && terms.len() < MAX_TERMS) {
            let basis = *Basis::ALL.choose(&mut self.rng).unwrap_or(&Basis::X);
            let coef: f64 = self.rng.sample(StandardNormal);
            terms.push(Term::new(basis, coef));
        } else if roll < 0.4 && terms.len() > 1 {
            let idx = self.rng.gen_range(0..terms.len());
            terms.remove(idx);
        } else {
            let idx = self.rng.gen_range(0..terms.len());
            let noise: f64 = self.rng.sample(StandardNormal);
            terms[idx].coef += scale * noise;
        }
        terms
    }
}

/// Per-proposal search parameters derived from the backend configuration.
#[derive(Debug, Clone)]
struct Sampling {
    proposals: usize,
    examples: usize,
    sample_temperature: f32,
    hand_over: f64,
    mutation_scale: f64,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            proposals: 1,
            examples: 1,
            sample_temperature: 1.0,
            hand_over: 0.0,
            mutation_scale: BASE_MUTATION_SCALE,
        }
    }
}

/// Deterministic island search standing in for an external engine.
#[derive(Debug)]
pub struct SimulatedBackend {
    seed: u64,
    rng: StdRng,
    data: Dataset,
    islands: Vec<Island>,
    sampling: Sampling,
    model: String,
    temperature: f32,
    record_prompts: bool,
    failure_rate: f64,
    diary: Option<PathBuf>,
    archive: BTreeMap<usize, ParetoEntry>,
}

impl SimulatedBackend {
    /// Backend searching for `2.5*x1**2 + sin(x1)`.
    pub fn new(seed: u64) -> Self {
        Self::with_target(
            seed,
            &[Term::new(Basis::X2, 2.5), Term::new(Basis::Sin, 1.0)],
        )
    }

    pub fn with_target(seed: u64, target: &[Term]) -> Self {
        let data = Dataset::sample(target);
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
            data,
            islands: Vec::new(),
            sampling: Sampling::default(),
            model: String::new(),
            temperature: 1.0,
            record_prompts: false,
            failure_rate: 0.0,
            diary: None,
            archive: BTreeMap::new(),
        }
    }

    /// Fail this fraction of steps (0.0 to 1.0).
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        self
    }

    pub fn island_count(&self) -> usize {
        self.islands.len()
    }

    fn write_diary(&self, calls: &[(usize, Vec<String>)]) -> std::io::Result<()> {
        let Some(path) = &self.diary else {
            return Ok(());
        };
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let now = Utc::now().format(DIARY_TIME_FORMAT);
        for (island, prompts) in calls {
            for prompt in prompts {
                if self.record_prompts {
                    writeln!(file, "[{now}] island {island} prompt: {prompt}")?;
                }
                writeln!(
                    file,
                    "[{now}] island {island} 模型: {} 温度: {:.2} get_answer 调用成功",
                    self.model, self.temperature
                )?;
            }
        }
        Ok(())
    }

    fn archive_island_bests(&mut self) {
        for candidate in self.islands.iter().filter_map(|i| i.best.as_ref()) {
            let complexity = candidate.terms.len();
            let better = self
                .archive
                .get(&complexity)
                .is_none_or(|e| candidate.score > e.score);
            if better {
                self.archive.insert(
                    complexity,
                    ParetoEntry {
                        complexity,
                        expression: candidate.expression(),
                        score: candidate.score,
                    },
                );
            }
        }
    }

    fn best(&self) -> Option<&Candidate> {
        self.islands
            .iter()
            .filter_map(|i| i.best.as_ref())
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }
}

impl SearchBackend for SimulatedBackend {
    fn configure(&mut self, config: &RunConfig) -> Result<(), ConfigurationError> {
        let backend = &config.backend;
        if let Some(keys) = &backend.api_keys_path
            && !keys.is_file()
        {
            return Err(ConfigurationError(format!(
                "API key file not found: {}",
                keys.display()
            )));
        }

        self.diary = match &backend.work_dir {
            Some(dir) => {
                fs::create_dir_all(dir).map_err(|e| {
                    ConfigurationError(format!("cannot create {}: {e}", dir.display()))
                })?;
                let path = dir.join(DIARY_FILE_NAME);
                File::create(&path).map_err(|e| {
                    ConfigurationError(format!("cannot create {}: {e}", path.display()))
                })?;
                Some(path)
            }
            None => None,
        };

        self.model = backend.primary_model().to_owned();
        self.temperature = backend.primary_temperature();
        self.record_prompts = backend.record_prompt_in_diary;
        self.sampling = Sampling {
            proposals: (backend.samplers * backend.generate).max(1),
            examples: backend.examples.max(1),
            sample_temperature: backend.sample_temperature.max(f32::EPSILON),
            hand_over: backend.hand_over_threshold,
            mutation_scale: BASE_MUTATION_SCALE * f64::from(self.temperature),
        };
        self.islands = (0..config.island_count)
            .map(|id| Island {
                id,
                rng: StdRng::seed_from_u64(self.seed.wrapping_add(id as u64 + 1)),
                best: None,
                ideas: Vec::new(),
            })
            .collect();
        self.archive.clear();
        debug!(
            "Simulated backend configured: {} islands, {} proposals per step",
            self.islands.len(),
            self.sampling.proposals
        );
        Ok(())
    }

    fn set_retention_policy(&mut self, policy: RetentionPolicy) {
        if policy == RetentionPolicy::Discard {
            for island in &mut self.islands {
                island.ideas.clear();
            }
        }
    }

    fn repopulate(&mut self) -> Result<(), StepError> {
        let Some(donor) = self.best().cloned() else {
            return Ok(());
        };

        let mut order: Vec<usize> = (0..self.islands.len()).collect();
        order.sort_by(|&a, &b| {
            let score = |i: usize| self.islands[i].best.as_ref().map_or(-1.0, |c| c.score);
            score(a).total_cmp(&score(b))
        });
        for &idx in &order[..self.islands.len() / 2] {
            let island = &mut self.islands[idx];
            island.best = Some(donor.clone());
            island.ideas.clear();
        }
        Ok(())
    }

    fn step(&mut self, units: usize) -> Result<(), StepError> {
        if self.islands.is_empty() {
            return Err(StepError("backend not configured".into()));
        }

        for _ in 0..units {
            if self.rng.gen_bool(self.failure_rate) {
                return Err(StepError("simulated model timeout".into()));
            }

            let data = &self.data;
            let sampling = &self.sampling;
            let calls: Vec<(usize, Vec<String>)> = self
                .islands
                .par_iter_mut()
                .map(|island| (island.id, island.evolve(data, sampling)))
                .collect();

            self.archive_island_bests();
            if let Err(e) = self.write_diary(&calls) {
                warn!("Simulated diary write failed: {e}");
            }
        }
        Ok(())
    }

    fn best_score(&self) -> Result<f64, QueryError> {
        self.best().map(|c| c.score).ok_or_else(QueryError::no_candidate)
    }

    fn best_expression(&self) -> Result<String, QueryError> {
        self.best()
            .map(Candidate::expression)
            .ok_or_else(QueryError::no_candidate)
    }

    fn diary_path(&self) -> Option<PathBuf> {
        self.diary.clone()
    }

    /// Archived bests that beat every simpler entry.
    fn pareto_frontier(&self) -> Result<Vec<ParetoEntry>, QueryError> {
        let mut frontier = Vec::new();
        let mut best = f64::NEG_INFINITY;
        for entry in self.archive.values() {
            if entry.score > best {
                best = entry.score;
                frontier.push(entry.clone());
            }
        }
        Ok(frontier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RunPhase, TerminationReason};
    use crate::search::{DiaryScanner, Orchestrator};
    use tempfile::tempdir;

    fn config(islands: usize) -> RunConfig {
        RunConfig {
            cycles: 2,
            epochs_per_cycle: 5,
            island_count: islands,
            shutdown_score: 100.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_queries_fail_before_first_step() {
        let mut backend = SimulatedBackend::new(7);
        assert!(backend.best_score().is_err());
        assert!(backend.step(1).is_err());

        backend.configure(&config(3)).unwrap();
        assert_eq!(backend.island_count(), 3);
        assert!(backend.best_expression().is_err());
        backend.repopulate().unwrap();

        backend.step(1).unwrap();
        let score = backend.best_score().unwrap();
        assert!((0.0..=100.0).contains(&score));
        assert!(!backend.best_expression().unwrap().is_empty());
    }

    #[test]
    fn test_deterministic_for_seed() {
        let run = |seed| {
            let mut backend = SimulatedBackend::new(seed);
            backend.configure(&config(4)).unwrap();
            backend.step(20).unwrap();
            (backend.best_score().unwrap(), backend.best_expression().unwrap())
        };
        assert_eq!(run(42), run(42));
    }

    #[test]
    fn test_search_improves() {
        let mut backend = SimulatedBackend::new(3);
        backend.configure(&config(4)).unwrap();
        backend.step(1).unwrap();
        let early = backend.best_score().unwrap();
        backend.step(200).unwrap();
        assert!(backend.best_score().unwrap() >= early);
    }

    #[test]
    fn test_exact_target_scores_full() {
        let data = Dataset::sample(&[Term::new(Basis::X, 2.0)]);
        assert!((data.score(&[Term::new(Basis::X, 2.0)]) - 100.0).abs() < 1e-9);
        assert_eq!(data.score(&[Term::new(Basis::X, -50.0)]), 0.0);
    }

    #[test]
    fn test_repopulate_lifts_worst_half() {
        let mut backend = SimulatedBackend::new(11);
        backend.configure(&config(4)).unwrap();
        backend.step(5).unwrap();
        let best = backend.best_score().unwrap();

        backend.repopulate().unwrap();
        let lifted = backend
            .islands
            .iter()
            .filter(|i| i.best.as_ref().is_some_and(|c| c.score == best))
            .count();
        assert!(lifted >= 2);
    }

    #[test]
    fn test_failure_rate_one_always_fails() {
        let mut backend = SimulatedBackend::new(1).with_failure_rate(1.0);
        backend.configure(&config(2)).unwrap();
        assert!(backend.step(1).is_err());
        assert!(backend.best_score().is_err());
    }

    #[test]
    fn test_missing_api_keys_rejected() {
        let dir = tempdir().unwrap();
        let mut run_config = config(2);
        run_config.backend.api_keys_path = Some(dir.path().join("keys.json"));
        let err = SimulatedBackend::new(1).configure(&run_config).unwrap_err();
        assert!(err.0.contains("keys.json"));
    }

    #[test]
    fn test_diary_matches_scanner() {
        let dir = tempdir().unwrap();
        let mut run_config = config(3);
        run_config.backend.work_dir = Some(dir.path().to_path_buf());
        run_config.backend.models = vec!["qwen-plus".into()];
        run_config.backend.samplers = 2;

        let mut backend = SimulatedBackend::new(5);
        backend.configure(&run_config).unwrap();
        backend.step(4).unwrap();

        let diary = backend.diary_path().unwrap();
        let text = fs::read_to_string(diary).unwrap();
        let tally = DiaryScanner::default().scan(&text);
        // 4 steps * 3 islands * 2 proposals
        assert_eq!(tally.total, 24);
        assert!(tally.recent.iter().all(|c| c.model == "qwen-plus"));
        assert!(tally.recent.iter().all(|c| c.timestamp.is_some()));
        assert_eq!(text.matches("prompt: ").count(), 24);
        assert_eq!(text.matches("温度: 1.00").count(), 24);
    }

    #[test]
    fn test_diary_honors_prompt_and_temperature_settings() {
        let dir = tempdir().unwrap();
        let mut run_config = config(2);
        run_config.backend.work_dir = Some(dir.path().to_path_buf());
        run_config.backend.models = vec!["qwen-plus".into(), "deepseek-v3".into()];
        run_config.backend.model_temperatures = vec![0.5];
        run_config.backend.record_prompt_in_diary = false;

        let mut backend = SimulatedBackend::new(8);
        backend.configure(&run_config).unwrap();
        backend.step(3).unwrap();

        let text = fs::read_to_string(backend.diary_path().unwrap()).unwrap();
        assert!(!text.contains("prompt: "));
        assert_eq!(text.matches("温度: 0.50").count(), 6);
        assert_eq!(DiaryScanner::default().scan(&text).total, 6);
    }

    #[test]
    fn test_examples_drawn_from_best_ideas() {
        let mut run_config = config(1);
        run_config.backend.examples = 1;
        run_config.backend.sample_temperature = 0.001;

        let mut backend = SimulatedBackend::new(13);
        backend.configure(&run_config).unwrap();
        backend.step(30).unwrap();

        let sampling = backend.sampling.clone();
        let island = &mut backend.islands[0];
        assert!(!island.ideas.is_empty());
        let mut ranked = island.ideas.clone();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        let top = ranked[0].terms.clone();
        assert_eq!(island.pick_example(&sampling), top);
    }

    #[test]
    fn test_pareto_frontier_increasing() {
        let mut backend = SimulatedBackend::new(9);
        backend.configure(&config(4)).unwrap();
        backend.step(100).unwrap();

        let frontier = backend.pareto_frontier().unwrap();
        assert!(!frontier.is_empty());
        assert!(frontier.windows(2).all(|w| w[0].complexity < w[1].complexity));
        assert!(frontier.windows(2).all(|w| w[0].score < w[1].score));
    }

    #[test]
    fn test_orchestrated_run_counts_diary_calls() {
        let dir = tempdir().unwrap();
        let mut run_config = config(2);
        run_config.backend.work_dir = Some(dir.path().to_path_buf());

        let mut orchestrator = Orchestrator::new(run_config, SimulatedBackend::new(21));
        let result = orchestrator.run().unwrap();

        assert_eq!(result.reason, TerminationReason::Exhausted);
        // 2 cycles * 5 epochs * 2 islands, one proposal each
        assert_eq!(result.total_api_calls, 20);
        assert!(!result.pareto_frontier.is_empty());
        assert_eq!(orchestrator.monitor().phase(), RunPhase::Completed);
    }
}
