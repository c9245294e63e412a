pub enum CronPart {
    Minute,
    Hours,
    Days,
    Months,
    DaysOfWeek,
}

impl CronPart {
    pub fn boundaries(&self) -> (u32, u32) {
        match self {
            CronPart::Minute => (0, 59),
            CronPart::Hours => (0, 23),
            CronPart::Days => (1, 31),
            CronPart::Months => (1, 12),
            // 0 and 7 are both Sunday
            CronPart::DaysOfWeek => (0, 7),
        }
    }

    /// Names accepted in place of numbers, the first one standing for the lower boundary
    pub fn names(&self) -> &'static [&'static str] {
        match self {
            CronPart::Months => &[
                "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
            ],
            CronPart::DaysOfWeek => &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"],
            _ => &[],
        }
    }
}
