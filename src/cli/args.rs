use clap::{Parser, ValueEnum};

use crate::config::defs::{JAVA_TAG, RSCRIPT_TAG};

#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum Instrument {
    #[default]
    #[value(name = "MiSeq", alias = "miseq")]
    MiSeq,
    #[value(name = "NextSeq", alias = "nextseq")]
    NextSeq,
}

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "tcrfactory-pipelines",
    version,
    about = "TCRFactory: TCR repertoire sequencing pipeline (MIGEC -> MiXCR -> VDJtools)"
)]
pub struct Arguments {

    #[arg(short = 't', long = "instrument", value_enum, help = "The sequencing instrument")]
    pub instrument: Instrument,

    #[arg(short = 'i', long = "input", help = "Input directory; it has to contain exactly one SampleInfo file")]
    pub input_dir: String,

    #[arg(short = 'o', long = "out", help = "Output directory. Defaults to '<input>/output'.")]
    pub out_dir: Option<String>,

    #[arg(short = 'm', long = "memory", default_value = "6G", help = "JVM heap limit, e.g. 6G or 512M")]
    pub memory: String,

    #[arg(short = 'f', long = "force-overseq", default_value_t = 0, help = "Force MIGEC overseq threshold (0 = off)")]
    pub force_overseq: u32,

    #[arg(short = 'c', long = "collisions", action, help = "Force the MIGEC collision filter (needs -f)")]
    pub collision_filter: bool,

    #[arg(short = 'b', long = "bin", help = "Directory holding (or receiving) the external tools")]
    pub bin_dir: Option<String>,

    #[arg(short = 'l', long = "log", help = "File receiving the run transcript")]
    pub log_file: Option<String>,

    #[arg(short = 'z', long = "compress", help = "Write the output tree to this .tar.gz and remove the tree")]
    pub compressed: Option<String>,

    #[arg(short = 'r', long = "remove-seq", action, help = "Remove sequence files (*.gz) from the output")]
    pub remove_seq: bool,

    #[arg(short = 'p', long = "port", default_value_t = 0, help = "Local port held for the run to prevent parallel instances (0 = off)")]
    pub port: u16,

    #[arg(short = 'n', long = "initialized", action, help = "Skip the tool check (all required tools are installed)")]
    pub initialized: bool,

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(long, default_value = JAVA_TAG, help = "Java launcher used for every jar")]
    pub java: String,

    #[arg(long, default_value = RSCRIPT_TAG, help = "R launcher for package checks and histogram.R")]
    pub rscript: String,

    #[arg(long, action, help = "Draw MIGEC overseq histograms with histogram.R (needs R, ggplot2, reshape)")]
    pub plot_histogram: bool,

    #[clap(long, help = "Optional wall-clock limit in seconds for every external command")]
    pub timeout: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Arguments::try_parse_from(["tcrfactory-pipelines", "-t", "MiSeq", "-i", "/data/run1"]).unwrap();
        assert_eq!(args.instrument, Instrument::MiSeq);
        assert_eq!(args.memory, "6G");
        assert_eq!(args.force_overseq, 0);
        assert_eq!(args.port, 0);
        assert!(args.out_dir.is_none());
        assert!(!args.collision_filter);
        assert!(!args.initialized);
        assert_eq!(args.java, JAVA_TAG);
        assert_eq!(args.rscript, "Rscript");
    }

    #[test]
    fn test_instrument_names() {
        let args = Arguments::try_parse_from(["tcrfactory-pipelines", "-t", "nextseq", "-i", "in", "-c", "-f", "3"]).unwrap();
        assert_eq!(args.instrument, Instrument::NextSeq);
        assert_eq!(args.force_overseq, 3);
        assert!(args.collision_filter);

        assert!(Arguments::try_parse_from(["tcrfactory-pipelines", "-t", "HiSeq", "-i", "in"]).is_err());
        assert!(Arguments::try_parse_from(["tcrfactory-pipelines", "-i", "in"]).is_err());
    }
}
