use itertools::Itertools;
use linked_hash_map::LinkedHashMap;

#[derive(Clone, Debug, PartialEq, Eq)]
/// The value returned from parsing an option.
pub enum ParseVal {
    /// A boolean option.
    Bool(bool),
}

impl ParseVal {
    pub fn bool(&self) -> bool {
        match self {
            ParseVal::Bool(b) => *b,
        }
    }
}

impl std::fmt::Display for ParseVal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseVal::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Option that can be passed to a pass.
pub struct PassOpt {
    name: &'static str,
    description: &'static str,
    default: ParseVal,
    parse: fn(&str) -> Option<ParseVal>,
}

impl PassOpt {
    pub const fn new(
        name: &'static str,
        description: &'static str,
        default: ParseVal,
        parse: fn(&str) -> Option<ParseVal>,
    ) -> Self {
        Self {
            name,
            description,
            default,
            parse,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn description(&self) -> &'static str {
        self.description
    }

    pub const fn default(&self) -> &ParseVal {
        &self.default
    }

    fn parse(&self, s: &str) -> Option<ParseVal> {
        (self.parse)(s)
    }

    pub fn parse_bool(s: &str) -> Option<ParseVal> {
        match s {
            "true" => Some(ParseVal::Bool(true)),
            "false" => Some(ParseVal::Bool(false)),
            _ => None,
        }
    }
}

/// Trait that describes named things.
///
/// The methods don't receive `self` so that option tables can be queried
/// without constructing the pass.
pub trait Named {
    /// The name of a pass. Is used for identifying passes.
    fn name() -> &'static str;
    /// A short description of the pass.
    fn description() -> &'static str;
    /// Set of options that can be passed to the pass.
    fn opts() -> Vec<PassOpt> {
        vec![]
    }

    /// Collect the values of [Named::opts] from `extra_opts`, which use the
    /// format `pass:opt` or `pass:opt=val`. Options that are not mentioned
    /// get their default value.
    fn get_opts(extra_opts: &[String]) -> LinkedHashMap<&'static str, ParseVal>
    where
        Self: Sized,
    {
        let opts = Self::opts();
        let n = Self::name();
        let mut values: LinkedHashMap<&'static str, ParseVal> = extra_opts
            .iter()
            .filter_map(|opt| {
                let mut splits = opt.split(':');
                if splits.next()? != n {
                    return None;
                }
                let mut splits = splits.next()?.split('=');
                let opt = splits.next()?.to_string();
                let Some(opt) = opts.iter().find(|o| o.name == opt) else {
                    log::warn!("Ignoring unknown option for pass `{n}`: {opt}");
                    return None;
                };
                let val = if let Some(v) = splits.next() {
                    let Some(v) = opt.parse(v) else {
                        log::warn!(
                            "Ignoring invalid value for option `{n}:{}`: {v}",
                            opt.name(),
                        );
                        return None;
                    };
                    v
                } else {
                    ParseVal::Bool(true)
                };
                Some((opt.name(), val))
            })
            .collect();

        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "Extra options for {}: {}",
                Self::name(),
                values.iter().map(|(o, v)| format!("{o}->{v}")).join(", ")
            );
        }

        for opt in opts {
            if !values.contains_key(opt.name()) {
                values.insert(opt.name(), opt.default.clone());
            }
        }

        values
    }
}

/// Configuration threaded through every scheduling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedOptions {
    /// Place data-path operations as late as possible so that more of them
    /// can share a function unit or chain into their consumer.
    pub schedule_datapath_alap: bool,
    /// Latch every data-path result into a register, forbidding
    /// combinational chains across cycle boundaries.
    pub disable_multi_cycles_chain: bool,
}

impl Default for SchedOptions {
    fn default() -> Self {
        Self {
            schedule_datapath_alap: true,
            disable_multi_cycles_chain: false,
        }
    }
}

impl Named for SchedOptions {
    fn name() -> &'static str {
        "sched"
    }

    fn description() -> &'static str {
        "Constraint-based scheduling of control-path and data-path units"
    }

    fn opts() -> Vec<PassOpt> {
        vec![
            PassOpt::new(
                "datapath-alap",
                "Schedule data-path operations as late as possible to allow \
                 more efficient resource sharing",
                ParseVal::Bool(true),
                PassOpt::parse_bool,
            ),
            PassOpt::new(
                "disable-multi-cycles-chain",
                "Copy every data-path result into a register",
                ParseVal::Bool(false),
                PassOpt::parse_bool,
            ),
        ]
    }
}

impl SchedOptions {
    /// Build the options from `-x sched:<opt>[=<val>]` style strings.
    pub fn from_extra_opts(extra_opts: &[String]) -> Self {
        let opts = Self::get_opts(extra_opts);
        Self {
            schedule_datapath_alap: opts["datapath-alap"].bool(),
            disable_multi_cycles_chain: opts["disable-multi-cycles-chain"]
                .bool(),
        }
    }
}
