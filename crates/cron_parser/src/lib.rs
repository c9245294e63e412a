pub use nom::error::ErrorKind;
use nom::{
    branch::alt,
    bytes::complete::tag_no_case,
    character::complete::space0,
    combinator::{all_consuming, value},
    sequence::delimited,
    IResult,
};
use nom_cron_timer::nom_cron_timer;
use taskqueue_cron_types::{CronTimer, CronValue};
use thiserror::Error;

mod nom_cron_timer;
mod types;

#[derive(Error, Debug)]
#[error("An error occured while parsing cron expression : \n{msg}")]
pub struct CronParseError {
    pub msg: String,
    pub input: String,
    pub error_kind: ErrorKind,
}

impl<'a> From<nom::Err<nom::error::Error<&'a str>>> for CronParseError {
    fn from(e: nom::Err<nom::error::Error<&'a str>>) -> Self {
        let msg = format!("{e:?}");
        let (input, error_kind) = match e {
            // Should not happen (only for streams)
            nom::Err::Incomplete(_) => (String::from(""), ErrorKind::Fail),
            nom::Err::Error(e) | nom::Err::Failure(e) => (e.input.to_string(), e.code),
        };

        CronParseError {
            msg,
            input,
            error_kind,
        }
    }
}

#[derive(Clone, Copy)]
enum CronMacro {
    Yearly,
    Monthly,
    Weekly,
    Daily,
    Hourly,
}

impl CronMacro {
    fn timer(self) -> CronTimer {
        let zero = || vec![CronValue::Number(0)];
        let first = || vec![CronValue::Number(1)];
        match self {
            CronMacro::Yearly => CronTimer {
                minutes: zero(),
                hours: zero(),
                days: first(),
                months: first(),
                ..Default::default()
            },
            CronMacro::Monthly => CronTimer {
                minutes: zero(),
                hours: zero(),
                days: first(),
                ..Default::default()
            },
            CronMacro::Weekly => CronTimer {
                minutes: zero(),
                hours: zero(),
                dows: zero(),
                ..Default::default()
            },
            CronMacro::Daily => CronTimer {
                minutes: zero(),
                hours: zero(),
                ..Default::default()
            },
            CronMacro::Hourly => CronTimer {
                minutes: zero(),
                ..Default::default()
            },
        }
    }
}

fn nom_cron_macro(input: &str) -> IResult<&str, CronTimer> {
    let (input, cron_macro) = alt((
        value(CronMacro::Yearly, tag_no_case("@yearly")),
        value(CronMacro::Yearly, tag_no_case("@annually")),
        value(CronMacro::Monthly, tag_no_case("@monthly")),
        value(CronMacro::Weekly, tag_no_case("@weekly")),
        value(CronMacro::Daily, tag_no_case("@daily")),
        value(CronMacro::Daily, tag_no_case("@midnight")),
        value(CronMacro::Hourly, tag_no_case("@hourly")),
    ))(input)?;

    Ok((input, cron_macro.timer()))
}

/// Parse a cron expression into a [`CronTimer`]
///
/// All times are UTC with minute resolution.
///
/// ```text
/// ┌───────────── minute (0 - 59)
/// │ ┌───────────── hour (0 - 23)
/// │ │ ┌───────────── day of the month (1 - 31)
/// │ │ │ ┌───────────── month (1 - 12)
/// │ │ │ │ ┌───────────── day of the week (0 - 7, 0 and 7 are Sunday)
/// │ │ │ │ │
/// * * * * *
/// ```
///
/// Each field accepts an explicit numeric value, `*` for all valid values, `*/n`
/// for every n-th valid value, ranges such as `1-5`, stepped ranges such as
/// `8-18/2` or `5/15`, and any combination of these separated by commas. Months
/// also accept `JAN` to `DEC` and days of week `SUN` to `SAT`, in any case. When both
/// the day of month and the day of week are restricted, a day matching either
/// fires.
///
/// The macros `@yearly`, `@annually`, `@monthly`, `@weekly`, `@daily`, `@midnight`
/// and `@hourly` are accepted in place of the five fields.
///
/// ```rust
/// use taskqueue_cron_parser::parse_cron;
/// use taskqueue_cron_types::CronValue;
///
/// let timer = parse_cron("*/15 8-18 * * 1-5").unwrap();
/// assert_eq!(timer.minutes, vec![CronValue::Step(15)]);
/// assert_eq!(timer.dows, vec![CronValue::Range(1, 5)]);
///
/// assert!(parse_cron("61 * * * *").is_err());
/// ```
pub fn parse_cron(input: &str) -> Result<CronTimer, CronParseError> {
    let (_, timer) =
        all_consuming(delimited(space0, alt((nom_cron_macro, nom_cron_timer)), space0))(input)?;
    Ok(timer)
}
