use std::fmt;

/// Wraps a value so logging it falls back to `-` instead of `None`.
pub struct FmtOption<'r, O>(pub Option<&'r O>);

impl<O> fmt::Display for FmtOption<'_, O>
where
    O: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(o) => o.fmt(f),
            None => f.write_str("-"),
        }
    }
}

pub trait AsFmtOption {
    type Fmt: fmt::Display;
    fn fmt_option(self) -> Self::Fmt;
}

impl<'e, O> AsFmtOption for &'e Option<O>
where
    O: fmt::Display,
{
    type Fmt = FmtOption<'e, O>;

    fn fmt_option(self) -> Self::Fmt {
        FmtOption(self.as_ref())
    }
}

/// Wraps an error so logging it prints the compact `Display` chain
/// (`cause1: cause2: cause3`) instead of `Debug`'s multi-line dump.
pub struct FmtCompact<'e>(&'e (dyn std::error::Error + 'static));

impl fmt::Display for FmtCompact<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(s) = source {
            write!(f, ": {s}")?;
            source = s.source();
        }
        Ok(())
    }
}

pub trait FmtCompactExt {
    fn fmt_compact(&self) -> FmtCompact<'_>;
}

impl<E> FmtCompactExt for E
where
    E: std::error::Error + 'static,
{
    fn fmt_compact(&self) -> FmtCompact<'_> {
        FmtCompact(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fmt_option_present_and_absent() {
        let present = Some(3u32);
        assert_eq!(present.fmt_option().to_string(), "3");
        let absent: Option<u32> = None;
        assert_eq!(absent.fmt_option().to_string(), "-");
    }
}
