use nom::{
    branch::alt,
    bytes::complete::tag_no_case,
    character::complete::{self, char, space1},
    error::{Error, ErrorKind},
    combinator::{map, opt, verify},
    multi::separated_list1,
    sequence::{preceded, separated_pair, terminated, tuple},
    IResult,
};
use taskqueue_cron_types::{CronTimer, CronValue};

use crate::types::CronPart;

/// Attempts to parse a month or day of week name, case insensitive
fn cron_name<'a>(
    names: &'static [&'static str],
    first: u32,
) -> impl Fn(&'a str) -> IResult<&'a str, u32> {
    move |input| {
        for (offset, name) in (0..).zip(names) {
            if let Ok((rest, _)) = tag_no_case::<_, _, Error<&str>>(*name)(input) {
                return Ok((rest, first + offset));
            }
        }
        Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)))
    }
}

/// Attempts to parse a number or a name with cron part boundaries
fn cron_number<'a>(part: &CronPart) -> impl Fn(&'a str) -> IResult<&'a str, u32> {
    let (min, max) = part.boundaries();
    let names = part.names();
    move |input| {
        alt((
            verify(complete::u32, |v: &u32| *v >= min && *v <= max),
            cron_name(names, min),
        ))(input)
    }
}

/// Attempts to parse a step divider, it must be at least 1 and fit in the field
fn cron_step<'a>(part: &CronPart) -> impl Fn(&'a str) -> IResult<&'a str, u32> {
    let (_, max) = part.boundaries();
    move |input| preceded(char('/'), verify(complete::u32, |v: &u32| *v >= 1 && *v <= max))(input)
}

/// Attempts to parse a range with cron part boundaries, optionally stepped
fn cron_range<'a, 'p>(part: &'p CronPart) -> impl Fn(&'a str) -> IResult<&'a str, CronValue> + 'p {
    move |input| {
        map(
            tuple((
                verify(
                    separated_pair(cron_number(part), char('-'), cron_number(part)),
                    |(left, right): &(u32, u32)| left < right,
                ),
                opt(cron_step(part)),
            )),
            |((left, right), step)| match step {
                Some(step) => CronValue::RangeStep(left, right, step),
                None => CronValue::Range(left, right),
            },
        )(input)
    }
}

/// Attempts to parse `*` or `*/n`
fn cron_wildcard<'a, 'p>(
    part: &'p CronPart,
) -> impl Fn(&'a str) -> IResult<&'a str, CronValue> + 'p {
    move |input| {
        map(preceded(char('*'), opt(cron_step(part))), |step| match step {
            Some(step) => CronValue::Step(step),
            None => CronValue::Any,
        })(input)
    }
}

/// Attempts to parse `n` or `n/s`, the latter running from `n` to the end of the field
fn cron_single<'a, 'p>(part: &'p CronPart) -> impl Fn(&'a str) -> IResult<&'a str, CronValue> + 'p {
    move |input| {
        let (_, max) = part.boundaries();
        map(
            tuple((cron_number(part), opt(cron_step(part)))),
            move |(n, step)| match step {
                Some(step) => CronValue::RangeStep(n, max, step),
                None => CronValue::Number(n),
            },
        )(input)
    }
}

/// Attempts to parse a cron value
fn cron_value<'a, 'p>(part: &'p CronPart) -> impl Fn(&'a str) -> IResult<&'a str, CronValue> + 'p {
    move |input| alt((cron_range(part), cron_wildcard(part), cron_single(part)))(input)
}

/// Attempts to parse comma separated cron values
fn cron_values<'a, 'p>(
    part: &'p CronPart,
) -> impl Fn(&'a str) -> IResult<&'a str, Vec<CronValue>> + 'p {
    move |input| separated_list1(char(','), cron_value(part))(input)
}

/// Parse all 5 cron fields
pub(crate) fn nom_cron_timer(input: &str) -> IResult<&str, CronTimer> {
    let (input, minutes) = terminated(cron_values(&CronPart::Minute), space1)(input)?;
    let (input, hours) = terminated(cron_values(&CronPart::Hours), space1)(input)?;
    let (input, days) = terminated(cron_values(&CronPart::Days), space1)(input)?;
    let (input, months) = terminated(cron_values(&CronPart::Months), space1)(input)?;
    let (input, dows) = cron_values(&CronPart::DaysOfWeek)(input)?;

    Ok((
        input,
        CronTimer {
            minutes,
            hours,
            days,
            months,
            dows,
        },
    ))
}
