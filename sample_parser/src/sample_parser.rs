use std::sync::Arc;

use anyhow::Result;
use earley_forest::{print_allocation_report, Grammar, Logger, Parser};
use sample_parser::{demo_grammar, demo_tokens, SeqMatcher};

// Demo driver: parse an ambiguous three-clause "sentence" against a
// hand-built grammar, dump the forest, then do the same against the
// grammar round-tripped through a binary grammar file.

fn run_hand_built() -> Result<()> {
    let (grammar, root) = demo_grammar();
    let grammar = Arc::new(grammar);
    let tokens = demo_tokens();
    let num_tokens = tokens.len() as u32;

    let mut parser = Parser::new(grammar.clone(), Box::new(SeqMatcher { tokens }));
    // stderr level 2 shows per-column progress.
    *parser.logger_mut() = Logger::new(0, 2);

    match parser.parse(0, root, num_tokens, None) {
        Ok(node) => {
            print!("{}", node.dump(&grammar));
            println!("{} combination(s)", node.num_combinations());
        }
        Err(e) => println!("no tree returned: {}", e),
    }
    println!("stats: {}", serde_json::to_string(parser.stats())?);
    Ok(())
}

fn run_binary_file() -> Result<()> {
    let (grammar, _) = demo_grammar();
    let path = std::env::temp_dir().join(format!("demo-{}.grammar.bin", std::process::id()));
    grammar.write_binary_file(&path)?;
    drop(grammar);

    let loaded = Arc::new(Grammar::from_binary_file(&path)?);
    std::fs::remove_file(&path).ok();

    let tokens = demo_tokens();
    let num_tokens = tokens.len() as u32;
    let root = loaded.root();
    let mut parser = Parser::new(loaded.clone(), Box::new(SeqMatcher { tokens }));
    *parser.logger_mut() = Logger::new(0, 1);
    match parser.parse(0, root, num_tokens, None) {
        Ok(node) => println!(
            "binary grammar: {} combination(s)",
            node.num_combinations()
        ),
        Err(e) => println!("binary grammar: no tree returned: {}", e),
    }
    Ok(())
}

fn main() -> Result<()> {
    run_hand_built()?;
    run_binary_file()?;
    print_allocation_report();
    Ok(())
}
