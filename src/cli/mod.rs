use clap::{Parser, Subcommand};

pub mod formatters;

#[derive(Parser)]
#[command(name = "pitax")]
#[command(version, about = "Polish PIT capital-gains calculator for brokerage orders")]
#[command(
    long_about = "Import brokerage orders, match sales FIFO against purchases, convert \
                  amounts to PLN with NBP historical rates and keep capital-gains and PIT \
                  reports per tax year."
)]
pub struct Cli {
    /// Disable colorized/ANSI output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Output results in JSON format
    #[arg(long = "json", global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Import an exported JSON array of orders and recompute affected years
    Import {
        /// Path to the JSON export
        file: String,

        /// User the orders belong to
        #[arg(short, long)]
        user: String,
    },

    /// List stored orders, newest first
    Orders {
        #[arg(short, long)]
        user: String,
    },

    /// Recompute capital-gains and PIT reports for tax years
    Recompute {
        #[arg(short, long)]
        user: String,

        /// Tax year (repeatable)
        #[arg(short, long = "year", required = true, num_args = 1..)]
        years: Vec<i32>,
    },

    /// Compute a report preview without saving it
    Preview {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        year: i32,

        /// Show the PIT projection instead of capital gains
        #[arg(long)]
        pit: bool,
    },

    /// List stored reports
    Reports {
        #[arg(short, long)]
        user: String,

        /// List PIT reports instead of capital-gains reports
        #[arg(long)]
        pit: bool,
    },

    /// Show the PLN rate used for a currency on a date (YYYY-MM-DD)
    Rate {
        currency: String,
        date: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_recompute_accepts_many_years() {
        let cli = Cli::try_parse_from([
            "pitax", "recompute", "--user", "u1", "--year", "2023", "--year", "2024",
        ])
        .unwrap();
        match cli.command {
            Commands::Recompute { user, years } => {
                assert_eq!(user, "u1");
                assert_eq!(years, vec![2023, 2024]);
            }
            _ => panic!("expected recompute"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["pitax", "reports", "-u", "u1", "--pit", "--json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Reports { pit: true, .. }));
    }
}
