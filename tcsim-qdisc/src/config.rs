use tcsim_aqm::{CobaltConfig, CodelConfig, PieConfig, RedConfig};

use crate::{
    AqmConfig, Bolt, BoltConfig, CobaltQueueDisc, CodelQueueDisc, ConfigError, Fifo, FifoConfig,
    FqCobalt, FqCodel, FqConfig, FqPie, Mq, PfifoFast, PfifoFastConfig, PieQueueDisc, Prio,
    PrioConfig, QueueDisc, RedQueueDisc, Tbf, TbfConfig,
};

/// A whole queue discipline tree.
///
/// # Example
///
/// ```
/// use tcsim_qdisc::{FifoConfig, PrioConfig, QdiscConfig, QueueDisc};
///
/// let tree = QdiscConfig::Prio {
///     config: PrioConfig::default(),
///     children: Some(vec![QdiscConfig::Fifo(FifoConfig::default()); 3]),
/// };
/// let qdisc = tree.build().unwrap();
/// assert_eq!(qdisc.kind(), "prio");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum QdiscConfig {
    Fifo(FifoConfig),
    PfifoFast(PfifoFastConfig),
    /// Strict priority. Without children every band gets a default FIFO.
    Prio { config: PrioConfig, children: Option<Vec<QdiscConfig>> },
    /// One child per transmit queue.
    Mq { children: Vec<QdiscConfig> },
    /// Token bucket shaper. Without a child, a FIFO bounded by `config.limit`.
    Tbf { config: TbfConfig, child: Option<Box<QdiscConfig>> },
    Red(AqmConfig<RedConfig>),
    Codel(AqmConfig<CodelConfig>),
    Pie(AqmConfig<PieConfig>),
    Cobalt(AqmConfig<CobaltConfig>),
    FqCodel(FqConfig<CodelConfig>),
    FqPie(FqConfig<PieConfig>),
    FqCobalt(FqConfig<CobaltConfig>),
    Bolt(BoltConfig),
}

impl QdiscConfig {
    /// Builds the tree, validating every node.
    pub fn build(self) -> Result<Box<dyn QueueDisc>, ConfigError> {
        Ok(match self {
            Self::Fifo(config) => Box::new(Fifo::new(config)?),
            Self::PfifoFast(config) => Box::new(PfifoFast::new(config)?),
            Self::Prio { config, children: None } => Box::new(Prio::new(config)?),
            Self::Prio { config, children: Some(children) } => {
                Box::new(Prio::with_children(config.priomap, build_all(children)?)?)
            }
            Self::Mq { children } => Box::new(Mq::with_children(build_all(children)?)?),
            Self::Tbf { config, child: None } => Box::new(Tbf::new(config)?),
            Self::Tbf { config, child: Some(child) } => {
                Box::new(Tbf::with_child(config, child.build()?)?)
            }
            Self::Red(config) => Box::new(RedQueueDisc::new(config)?),
            Self::Codel(config) => Box::new(CodelQueueDisc::new(config)?),
            Self::Pie(config) => Box::new(PieQueueDisc::new(config)?),
            Self::Cobalt(config) => Box::new(CobaltQueueDisc::new(config)?),
            Self::FqCodel(config) => Box::new(FqCodel::new(config)?),
            Self::FqPie(config) => Box::new(FqPie::new(config)?),
            Self::FqCobalt(config) => Box::new(FqCobalt::new(config)?),
            Self::Bolt(config) => Box::new(Bolt::new(config)?),
        })
    }
}

fn build_all(children: Vec<QdiscConfig>) -> Result<Vec<Box<dyn QueueDisc>>, ConfigError> {
    children.into_iter().map(QdiscConfig::build).collect()
}

#[cfg(test)]
mod tests {
    use tcsim_aqm::AqmConfigError;
    use tcsim_common::{QueueLimit, SimTime};
    use tcsim_packet::Packet;

    use super::*;

    #[test]
    fn builds_nested_tree() {
        let _ = tracing_subscriber::fmt::try_init();

        let tree = QdiscConfig::Tbf {
            config: TbfConfig::default(),
            child: Some(Box::new(QdiscConfig::Prio {
                config: PrioConfig::default().with_bands(2).with_priomap([0; 16]),
                children: Some(vec![
                    QdiscConfig::FqCodel(FqConfig::default()),
                    QdiscConfig::Codel(AqmConfig::default()),
                ]),
            })),
        };
        let mut qdisc = tree.build().unwrap();
        assert_eq!(qdisc.kind(), "tbf");
        assert_eq!(qdisc.limit(), None);

        qdisc.run(SimTime::ZERO).unwrap();
        assert!(qdisc.enqueue(Packet::new(1, 1_000), SimTime::ZERO).is_accepted());
        assert_eq!(qdisc.dequeue(SimTime::ZERO).map(|p| p.uid), Some(1));
    }

    #[test]
    fn reports_the_failing_node() {
        let tree = QdiscConfig::Mq {
            children: vec![
                QdiscConfig::Fifo(FifoConfig::default()),
                QdiscConfig::PfifoFast(PfifoFastConfig::default().with_limit(QueueLimit::Bytes(1))),
            ],
        };
        assert_eq!(
            tree.build().unwrap_err(),
            ConfigError::UnsupportedLimit { kind: "pfifo_fast", limit: "byte" }
        );

        let red = RedConfig::default().with_thresholds(10.0, 5.0);
        let err = QdiscConfig::Red(AqmConfig::new(red)).build().unwrap_err();
        assert!(matches!(err, ConfigError::Aqm(AqmConfigError::Thresholds { .. })));
    }
}
