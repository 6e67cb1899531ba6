use anyhow::{anyhow, Result};
use clap::Parser;

/// Plaintext reference for the intersection indicator: prints 1 when the two
/// triples share at least one interest identifier, else 0.
#[derive(Parser)]
struct Opt {
    /// First triple, e.g. 1,2,3
    mine: String,
    /// Second triple, e.g. 5,6,3
    theirs: String,
}

fn parse_triple(s: &str) -> Result<[u32; 3]> {
    let values: Result<Vec<u32>> = s
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<u32>()
                .map_err(|_| anyhow!("'{}' is not an integer interest", v.trim()))
        })
        .collect();
    values?
        .try_into()
        .map_err(|_| anyhow!("provide exactly three interests, e.g. 1,2,3"))
}

fn indicator(mine: &[u32; 3], theirs: &[u32; 3]) -> u32 {
    mine.iter().any(|a| theirs.contains(a)) as u32
}

fn main() -> Result<()> {
    let opt = Opt::parse();
    let mine = parse_triple(&opt.mine)?;
    let theirs = parse_triple(&opt.theirs)?;
    println!("{}", indicator(&mine, &theirs));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indicator_matches_set_semantics() {
        assert_eq!(indicator(&[1, 2, 3], &[5, 6, 3]), 1);
        assert_eq!(indicator(&[1, 4, 5], &[2, 3, 6]), 0);
        assert_eq!(indicator(&[4, 4, 4], &[4, 1, 2]), 1);
        // position independent
        assert_eq!(indicator(&[3, 2, 1], &[6, 5, 3]), 1);
    }

    #[test]
    fn parse_rejects_wrong_count() {
        assert!(parse_triple("1,2").is_err());
        assert!(parse_triple("1,2,3,4").is_err());
        assert!(parse_triple("1,x,3").is_err());
        assert_eq!(parse_triple(" 1, 2 ,3 ").unwrap(), [1, 2, 3]);
    }
}
