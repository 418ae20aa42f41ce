/// Compute device the optimizer runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Device {
    /// Run on the host CPU.
    Cpu,
    /// Run on a CUDA device.
    #[cfg(feature = "cuda")]
    Cuda {
        /// CUDA device id.
        device_id: usize,
    },
}

impl Device {
    /// Pick the compute device for a session.
    ///
    /// The `cuda` cargo feature stands in for a runtime presence probe:
    /// when `use_accelerator` is set and the feature is compiled in, device
    /// 0 is assumed present and selected. Builds without the feature always
    /// resolve to the CPU, logging the fallback when an accelerator was
    /// requested.
    pub fn probe(use_accelerator: bool) -> Self {
        if !use_accelerator {
            return Device::Cpu;
        }
        #[cfg(feature = "cuda")]
        {
            log::info!("cuda feature compiled in, assuming device 0 is present");
            Device::Cuda { device_id: 0 }
        }
        #[cfg(not(feature = "cuda"))]
        {
            log::info!("accelerator requested but unavailable, falling back to cpu");
            Device::Cpu
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            #[cfg(feature = "cuda")]
            Device::Cuda { device_id } => write!(f, "cuda:{}", device_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_without_request_is_cpu() {
        assert_eq!(Device::probe(false), Device::Cpu);
    }

    #[test]
    #[cfg(feature = "cuda")]
    fn probe_with_cuda_compiled_in_selects_device_zero() {
        assert_eq!(Device::probe(true), Device::Cuda { device_id: 0 });
    }

    #[test]
    fn display() {
        assert_eq!(Device::Cpu.to_string(), "cpu");
    }
}
