//! Request attributes carried by CoAP query options.

/// Notification attributes attached to Observe or Write-Attributes.
///
/// The engine core only honors `min_period`/`max_period`; the extended set
/// is parsed by the transport but rejected by Write-Attributes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NotificationAttrs {
    /// pmin, seconds.
    pub min_period: Option<u32>,
    /// pmax, seconds. Zero disables the period.
    pub max_period: Option<u32>,
    pub greater_than: Option<f64>,
    pub less_than: Option<f64>,
    pub step: Option<f64>,
    /// epmin, seconds.
    pub min_eval_period: Option<u32>,
    /// epmax, seconds.
    pub max_eval_period: Option<u32>,
    pub edge: Option<bool>,
    pub con: Option<bool>,
    pub hqmax: Option<u32>,
}

impl NotificationAttrs {
    pub fn has_any(&self) -> bool {
        self.min_period.is_some() || self.max_period.is_some() || self.has_unsupported()
    }

    /// True when any attribute beyond pmin/pmax is present.
    pub fn has_unsupported(&self) -> bool {
        self.greater_than.is_some()
            || self.less_than.is_some()
            || self.step.is_some()
            || self.min_eval_period.is_some()
            || self.max_eval_period.is_some()
            || self.edge.is_some()
            || self.con.is_some()
            || self.hqmax.is_some()
    }
}

/// Attributes of an incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Attributes {
    /// Discover depth option.
    pub discover_depth: Option<u8>,
    /// Observe / Write-Attributes parameters.
    pub notification: Option<NotificationAttrs>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_detection() {
        let mut attrs = NotificationAttrs {
            min_period: Some(5),
            ..Default::default()
        };
        assert!(attrs.has_any());
        assert!(!attrs.has_unsupported());
        attrs.greater_than = Some(20.0);
        assert!(attrs.has_unsupported());
    }
}
