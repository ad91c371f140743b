mod common;

use std::collections::HashMap;

use anyhow::Result;
use candle_core::Device;
use rand::SeedableRng;
use rand::rngs::StdRng;

use common::{PatternLm, ScriptedLm, SpyPredictor, WordTokenizer};
use steer_gen::error::SteerError;
use steer_gen::inference::{
    FusionWeight, LineConfig, LineStatus, PoetryPredictors, Selection, VerseContext,
    complete_couplet, generate_line,
};
use steer_gen::lm::{LanguageModel, TextTokenizer};
use steer_gen::model::Task;
use steer_gen::oracle::{LinguisticOracle, PronouncingDict};
use steer_gen::tables::{RhymeTable, UNKNOWN_RHYME_GROUP, WordVocab};

const VOCAB: usize = 60;
const FIRST_LINE: &str = "shall i compare thee to a summer day.";

const DICT: &str = "\
THE  DH AH0
WEATHER  W EH1 DH ER0
TODAY  T AH0 D EY1
IS  IH1 Z
RAIN  R EY1 N
STORM  S T AO1 R M
SUN  S AH1 N
CAT  K AE1 T
SAT  S AE1 T
ON  AA1 N
A  AH0
MAT  M AE1 T
HAT  HH AE1 T
DAY  D EY1
AWAY  AH0 W EY1
SHALL  SH AE1 L
I  AY1
COMPARE  K AH0 M P EH1 R
THEE  DH IY1
TO  T UW1
SUMMER  S AH1 M ER0
";

struct Fixture {
    tok: WordTokenizer,
    dict: PronouncingDict,
    rhymes: RhymeTable,
    iambic: SpyPredictor,
    rhyme: SpyPredictor,
    newline: SpyPredictor,
}

impl Fixture {
    /// Spies that never match a token, so they leave the base ranking alone.
    fn neutral() -> Self {
        Self::with_newline_favoring(u32::MAX)
    }

    fn with_newline_favoring(token: u32) -> Self {
        let dict = PronouncingDict::parse(DICT);
        let counts: HashMap<String, u64> = ["day", "away", "today", "cat", "mat", "the", "w0"]
            .into_iter()
            .map(|w| (w.to_string(), 2))
            .collect();
        let vocab = WordVocab::from_counts(counts, 100);
        let rhymes = RhymeTable::build(&vocab, &dict);
        Self {
            tok: WordTokenizer::new(VOCAB),
            dict,
            rhymes,
            iambic: SpyPredictor::new(Task::Iambic, u32::MAX),
            rhyme: SpyPredictor::new(Task::Rhyme, u32::MAX),
            newline: SpyPredictor::new(Task::Newline, token),
        }
    }

    fn ctx<'a>(&'a self, model: &'a dyn LanguageModel) -> VerseContext<'a> {
        VerseContext {
            model,
            tokenizer: &self.tok,
            predictors: PoetryPredictors {
                iambic: &self.iambic,
                rhyme: &self.rhyme,
                newline: &self.newline,
            },
            oracle: &self.dict,
            rhymes: &self.rhymes,
        }
    }

    fn scripted(&self, script: &[&str]) -> ScriptedLm {
        ScriptedLm {
            vocab: VOCAB,
            offset: self.tok.encode(FIRST_LINE).unwrap().len(),
            script: script.iter().map(|w| self.tok.id(w)).collect(),
            device: Device::Cpu,
        }
    }
}

fn greedy(lambda: f32) -> LineConfig {
    LineConfig {
        selection: Selection::Greedy,
        condition_lambda: FusionWeight(lambda),
        banned_tokens: Vec::new(),
        ..LineConfig::default()
    }
}

#[test]
fn line_completes_on_ten_syllables_and_a_phrase_end() -> Result<()> {
    let fx = Fixture::neutral();
    let mut script = vec!["cat"; 10];
    script.push(".");
    script.push("cat");
    let lm = fx.scripted(&script);
    let mut rng = StdRng::seed_from_u64(0);

    let [first, second] = complete_couplet(&fx.ctx(&lm), FIRST_LINE, &greedy(1.0), &mut rng)?;
    assert_eq!(first, FIRST_LINE);
    assert_eq!(second, format!("{}.", " cat".repeat(10)));
    assert_eq!(fx.dict.count_syllables(&second), 10);
    // three predictor calls per step, one spy each
    assert_eq!(fx.newline.calls.get(), 11);
    assert_eq!(fx.iambic.calls.get(), 11);
    assert_eq!(fx.rhyme.calls.get(), 11);
    Ok(())
}

#[test]
fn ten_syllables_without_a_phrase_end_continues() -> Result<()> {
    let fx = Fixture::neutral();
    let lm = fx.scripted(&["cat"; 12]);
    let mut rng = StdRng::seed_from_u64(0);
    let target = fx.rhymes.target("day")?;

    let line = generate_line(&fx.ctx(&lm), FIRST_LINE, "", target, &greedy(0.0), &mut rng)?;
    assert_eq!(line, " cat".repeat(11));
    assert_eq!(
        LineStatus::evaluate(fx.dict.count_syllables(&line), 10, &line),
        LineStatus::Overshoot
    );
    assert_eq!(fx.newline.calls.get(), 0);
    Ok(())
}

#[test]
fn phrase_end_alone_runs_to_the_cutoff() -> Result<()> {
    let fx = Fixture::with_newline_favoring(WordTokenizer::new(VOCAB).id("."));
    let lm = PatternLm::new(VOCAB);
    let cfg = LineConfig {
        precondition_topk: VOCAB,
        condition_lambda: FusionWeight(100.0),
        length_cutoff: 6,
        ..greedy(1.0)
    };
    let mut rng = StdRng::seed_from_u64(0);
    let target = fx.rhymes.target("day")?;

    let line = generate_line(&fx.ctx(&lm), FIRST_LINE, "", target, &cfg, &mut rng)?;
    assert_eq!(line, ".".repeat(6));
    assert_eq!(fx.newline.calls.get(), 6);
    Ok(())
}

#[test]
fn banned_tokens_are_never_emitted() -> Result<()> {
    let fx = Fixture::neutral();
    let newline = fx.tok.id("\n");
    let lm = PatternLm::favoring(VOCAB, newline);
    let cfg = LineConfig {
        banned_tokens: vec![newline],
        length_cutoff: 12,
        ..LineConfig::default()
    };
    let mut rng = StdRng::seed_from_u64(5);
    let target = fx.rhymes.target("day")?;

    let line = generate_line(&fx.ctx(&lm), FIRST_LINE, " the", target, &cfg, &mut rng)?;
    assert!(line.starts_with(" the"));
    assert!(!line.contains('\n'));
    Ok(())
}

#[test]
fn rejects_full_prefix_and_swapped_predictors() -> Result<()> {
    let fx = Fixture::neutral();
    let lm = PatternLm::new(VOCAB);
    let mut rng = StdRng::seed_from_u64(0);
    let target = fx.rhymes.target("day")?;

    let prefix = " cat".repeat(10);
    let err = generate_line(&fx.ctx(&lm), FIRST_LINE, &prefix, target, &greedy(1.0), &mut rng)
        .unwrap_err();
    assert!(matches!(err, SteerError::InvalidInput(_)));

    let mut ctx = fx.ctx(&lm);
    ctx.predictors.iambic = &fx.rhyme;
    let err = generate_line(&ctx, FIRST_LINE, "", target, &greedy(1.0), &mut rng).unwrap_err();
    assert!(matches!(
        err,
        SteerError::TaskMismatch {
            expected: Task::Iambic,
            found: Task::Rhyme
        }
    ));
    assert_eq!(lm.calls.get(), 0);
    Ok(())
}

#[test]
fn couplet_after_an_unrhymable_word_uses_the_sentinel_group() -> Result<()> {
    let fx = Fixture::neutral();
    let first_line = "shall i compare thee to a w5.";
    let target = fx.rhymes.target("w5")?;
    assert_eq!(fx.rhymes.group(target.index), Some(UNKNOWN_RHYME_GROUP));

    let mut script = vec![fx.tok.id("cat"); 10];
    script.push(fx.tok.id("."));
    let lm = ScriptedLm {
        vocab: VOCAB,
        offset: fx.tok.encode(first_line)?.len(),
        script,
        device: Device::Cpu,
    };
    let mut rng = StdRng::seed_from_u64(0);

    let [first, second] = complete_couplet(&fx.ctx(&lm), first_line, &greedy(1.0), &mut rng)?;
    assert_eq!(first, first_line);
    assert_eq!(second, format!("{}.", " cat".repeat(10)));
    assert_eq!(fx.rhyme.calls.get(), 11);
    Ok(())
}

#[test]
fn empty_base_shortlist_is_rejected() -> Result<()> {
    let fx = Fixture::neutral();
    let lm = PatternLm::new(VOCAB);
    let cfg = LineConfig {
        precondition_topk: 0,
        ..greedy(0.0)
    };
    let mut rng = StdRng::seed_from_u64(0);
    let target = fx.rhymes.target("day")?;

    let err = generate_line(&fx.ctx(&lm), FIRST_LINE, "", target, &cfg, &mut rng).unwrap_err();
    assert!(matches!(err, SteerError::InvalidInput(_)));
    assert_eq!(lm.calls.get(), 0);
    Ok(())
}
