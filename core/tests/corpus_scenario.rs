use std::fs;
use std::path::Path;
use trove_core::chain::{Chain, ChainIndex, LoadOptions};
use trove_core::config::PipelineConfig;
use trove_core::dictionary::{build_token_cache, Dictionary};
use trove_core::ngram::{build_ngram_files, build_ngram_freq, build_ngram_index, load_freq, load_ngram_table};
use trove_core::persist::{load_postings, CachePaths};
use trove_core::pipeline::Pipeline;
use trove_core::query::Corpus;
use trove_core::report::{generate, ReportKind, ReportParams};
use trove_core::word_index::{build_word_index, load_word_index};
use trove_core::{Ngram, TroveError};

const MAX_N: usize = 4;

fn write_corpus(root: &Path) {
    fs::create_dir_all(root).unwrap();
    fs::write(root.join("a.txt"), "the quick brown fox jumps").unwrap();
    fs::write(root.join("b.txt"), "quick brown fox jumps over").unwrap();
    fs::write(root.join("c.txt"), "lazy dog sleeps all day").unwrap();
}

fn pipeline(log_dir: &Path) -> Pipeline {
    Pipeline::new(PipelineConfig::default().with_workers(2).with_log_dir(log_dir))
}

async fn build_all(input: &Path, paths: &CachePaths) {
    let p = pipeline(&paths.root);
    build_token_cache(input, paths, &p).await.unwrap();
    build_word_index(paths, &p).await.unwrap();
    build_ngram_index(paths, MAX_N, &p).await.unwrap();
    build_ngram_freq(paths, MAX_N, &p).await.unwrap();
    build_ngram_files(paths, MAX_N).unwrap();
}

fn assert_valid(chain: &Chain) {
    for pair in chain.segments.windows(2) {
        let left: Vec<&str> = pair[0].phrase.split(' ').collect();
        let right: Vec<&str> = pair[1].phrase.split(' ').collect();
        assert_eq!(&left[left.len() - 2..], &right[..2], "bad link in {:?}", chain.text);
    }
    let min_segment = chain.segments.iter().map(|s| s.count).min().unwrap();
    assert!(chain.file_count() <= min_segment, "{:?} claims too many files", chain.text);
}

fn texts(chains: &[Chain]) -> Vec<&str> { chains.iter().map(|c| c.text.as_str()).collect() }

fn ngram_of(dict: &Dictionary, phrase: &str) -> Ngram {
    Ngram(phrase.split(' ').map(|w| dict.word_id(w).unwrap()).collect())
}

#[tokio::test]
async fn three_file_corpus_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("normalized");
    write_corpus(&input);
    let paths = CachePaths::new(dir.path().join("cache"));
    build_all(&input, &paths).await;

    let dict = Dictionary::load(&paths).unwrap();
    assert_eq!(dict.words.len(), 11);
    assert_eq!(dict.files, vec!["a.txt", "b.txt", "c.txt"]);
    assert!(dict.words.windows(2).all(|w| w[0] < w[1]));

    // word → files
    let postings = load_word_index(&paths, dict.files.len()).unwrap();
    assert_eq!(postings.len(), 11);
    assert_eq!(postings[dict.word_id("quick").unwrap() as usize].as_slice(), &[0, 1]);
    assert_eq!(postings[dict.word_id("day").unwrap() as usize].as_slice(), &[2]);
    let file_words: Vec<Vec<String>> = dict
        .files
        .iter()
        .map(|rel| fs::read_to_string(input.join(rel)).unwrap().split_whitespace().map(str::to_string).collect())
        .collect();
    for (word_id, files) in postings.iter().enumerate() {
        let word = &dict.words[word_id];
        for (file_id, words) in file_words.iter().enumerate() {
            assert_eq!(files.as_slice().contains(&(file_id as u32)), words.contains(word), "{word} in file {file_id}");
        }
    }

    // 4-gram membership
    let table = load_ngram_table(&paths, 4).unwrap();
    let membership = load_postings(&paths.ngram_index(4), "ngrams").unwrap();
    let qbfj = ngram_of(&dict, "quick brown fox jumps");
    let id = table.iter().position(|g| *g == qbfj).unwrap();
    assert_eq!(membership[id], vec![0, 1]);
    // first-seen order: file 0's first window gets ID 0
    assert_eq!(table[0], ngram_of(&dict, "the quick brown fox"));

    // frequency prunes singletons, membership keeps them
    let lds = ngram_of(&dict, "lazy dog sleeps");
    let freq = load_freq(&paths, 3, 0, dict.words.len()).unwrap().unwrap();
    assert!(freq.iter().all(|r| r.ngram != lds));
    assert!(freq.iter().all(|r| r.count >= 2));
    let table3 = load_ngram_table(&paths, 3).unwrap();
    let membership3 = load_postings(&paths.ngram_index(3), "ngrams").unwrap();
    let lds_id = table3.iter().position(|g| *g == lds).unwrap();
    assert_eq!(membership3[lds_id], vec![2]);

    // reverse index inverts membership
    let by_file = load_postings(&paths.ngram_files(3), "ngramfiles").unwrap();
    assert_eq!(by_file.len(), 3);
    for (file, ids) in by_file.iter().enumerate() {
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        for &g in ids {
            assert!(membership3[g as usize].contains(&(file as u32)));
        }
    }
    assert!(by_file[2].contains(&(lds_id as u32)));
}

#[tokio::test]
async fn pairwise_chains_are_valid_and_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("normalized");
    write_corpus(&input);
    let paths = CachePaths::new(dir.path().join("cache"));
    build_all(&input, &paths).await;
    let corpus = Corpus::open(&paths.root, MAX_N).unwrap();

    let opts = LoadOptions { min_n: 2, max_n: MAX_N, per_order: 200, min_files: 2, skip_numeric: false };
    let index = ChainIndex::load(&corpus.paths, &corpus.words, corpus.files.len(), &opts, |_, _| {}).unwrap();
    let chains = index.pairwise(2);
    assert!(chains.iter().any(|c| c.text == "quick brown fox jumps" && c.file_count() == 2));

    assert_eq!(texts(&chains), vec!["quick brown fox jumps", "brown fox jumps", "quick brown fox"]);
    for chain in &chains {
        assert_valid(chain);
        assert_eq!(chain.file_count(), 2);
    }

    let again = ChainIndex::load(&corpus.paths, &corpus.words, corpus.files.len(), &opts, |_, _| {}).unwrap();
    assert_eq!(again.pairwise(2), chains);

    let too_many = LoadOptions { min_files: 10, ..opts.clone() };
    let sparse = ChainIndex::load(&corpus.paths, &corpus.words, corpus.files.len(), &too_many, |_, _| {}).unwrap();
    assert!(sparse.pairwise(10).is_empty());
    assert!(index.pairwise(10).is_empty());
}

#[tokio::test]
async fn three_hop_and_best_chains_on_shared_passage() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("normalized");
    write_corpus(&input);
    let paths = CachePaths::new(dir.path().join("cache"));
    build_all(&input, &paths).await;
    let corpus = Corpus::open(&paths.root, MAX_N).unwrap();

    let opts = LoadOptions { min_n: 2, max_n: MAX_N, per_order: 200, min_files: 2, skip_numeric: false };
    let load = || ChainIndex::load(&corpus.paths, &corpus.words, corpus.files.len(), &opts, |_, _| {}).unwrap();
    let index = load();
    assert_eq!(index.len(), 6);

    let hops = index.three_hop(2);
    assert_eq!(texts(&hops), vec!["quick brown fox jumps", "brown fox jumps", "quick brown fox"]);
    for chain in &hops {
        assert_eq!(chain.segments.len(), 3);
        assert_valid(chain);
        assert_eq!(chain.coverage.files().unwrap().as_slice(), &[0, 1]);
    }
    assert!(index.three_hop(3).is_empty());

    let best = index.best_chains(10);
    assert_eq!(texts(&best), vec!["quick brown fox jumps", "brown fox jumps"]);
    assert_eq!(best[0].score(), 8);
    assert_eq!(best[1].score(), 6);
    best.iter().for_each(assert_valid);
    assert!(best.iter().all(|c| c.text != "the quick brown fox jumps over" || c.file_count() <= 1));
    assert_eq!(load().best_chains(10), best);
}

#[tokio::test]
async fn chains_fall_back_to_frequency_counts() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("normalized");
    write_corpus(&input);
    let paths = CachePaths::new(dir.path().join("cache"));
    build_all(&input, &paths).await;
    for n in 2..=MAX_N {
        fs::remove_file(paths.ngram_index(n)).unwrap();
    }
    let corpus = Corpus::open(&paths.root, MAX_N).unwrap();

    let opts = LoadOptions { min_n: 2, max_n: MAX_N, per_order: 200, min_files: 2, skip_numeric: false };
    let index = ChainIndex::load(&corpus.paths, &corpus.words, corpus.files.len(), &opts, |_, _| {}).unwrap();
    assert_eq!(index.len(), 6);
    assert!(index.entries().iter().all(|e| e.files.is_none()));

    let chains = index.pairwise(2);
    assert_eq!(texts(&chains), vec!["quick brown fox jumps", "brown fox jumps", "quick brown fox"]);
    for chain in &chains {
        assert_valid(chain);
        assert!(chain.coverage.files().is_none());
        assert!(chain.file_count() <= corpus.files.len() as u64);
    }
    assert!(index.pairwise(4).is_empty());

    let best = index.best_chains(10);
    assert_eq!(texts(&best), vec!["quick brown fox jumps", "brown fox jumps"]);
    assert_eq!(best[0].score(), 8);
}

#[tokio::test]
async fn rebuilding_the_dictionary_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("normalized");
    write_corpus(&input);
    let paths = CachePaths::new(dir.path().join("cache"));
    let p = pipeline(&paths.root);

    build_token_cache(&input, &paths, &p).await.unwrap();
    let first = (fs::read(paths.words()).unwrap(), fs::read(paths.files()).unwrap());
    build_token_cache(&input, &paths, &p).await.unwrap();
    let second = (fs::read(paths.words()).unwrap(), fs::read(paths.files()).unwrap());
    assert_eq!(first, second);
}

#[tokio::test]
async fn later_stages_need_the_dictionary() {
    let dir = tempfile::tempdir().unwrap();
    let paths = CachePaths::new(dir.path().join("empty"));
    let p = pipeline(dir.path());
    match build_ngram_index(&paths, 3, &p).await {
        Err(TroveError::MissingPrerequisite { stage, .. }) => assert_eq!(stage, "tokens"),
        other => panic!("expected missing prerequisite, got {other:?}"),
    }
    assert!(matches!(build_ngram_freq(&paths, 1, &p).await, Err(TroveError::InvalidConfig(_))));
}

#[tokio::test]
async fn reports_and_file_queries() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("normalized");
    write_corpus(&input);
    let paths = CachePaths::new(dir.path().join("cache"));
    build_all(&input, &paths).await;
    let corpus = Corpus::open(&paths.root, MAX_N).unwrap();
    assert!(corpus.stats().built_at.is_some());

    let phrases = corpus.file_ngrams(0, 4, 2).unwrap().unwrap();
    assert_eq!(phrases.file, "a.txt");
    assert_eq!(phrases.phrases.len(), 1);
    assert_eq!(phrases.phrases[0].phrase, "quick brown fox jumps");
    assert!(corpus.file_ngrams(9, 4, 2).unwrap().is_none());

    let reports = dir.path().join("reports");
    let params = ReportParams { min_n: 3, ..Default::default() };
    let mut last = 0;
    let path = generate(&corpus, ReportKind::BestChains, &params, &reports, "42", |done, _, _| last = done).unwrap();
    assert_eq!(last, 100);
    assert!(path.ends_with("report_42.json"));
    let json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    assert_eq!(json["type"], "best_chains");
    let chains = json["chains"].as_array().unwrap();
    assert_eq!(json["chainCount"], 5);
    assert_eq!(chains[0]["fullText"], "lazy dog sleeps all day");
    assert!(chains.iter().all(|c| c["fileCount"] == 1));
    assert!(chains.iter().any(|c| c["fullText"] == "quick brown fox jumps over"));
    assert!(chains.iter().all(|c| c["fullText"] != "the quick brown fox jumps over"));
}
