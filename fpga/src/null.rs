use crate::{Bus, Input, Output, Pins, Port, Result};

#[derive(Copy, Clone, Debug)]
/// Mock accelerator, all writes are suppressed, all reads return default values.
pub struct Null(());

impl Null {
    pub fn new() -> Self {
        Self(())
    }
}

impl Default for Null {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for Null {
    fn send(&mut self, _: u32) -> Result<()> {
        Ok(())
    }

    fn send_block(&mut self, _: &[u32]) -> Result<()> {
        Ok(())
    }

    fn send_receive(&mut self, _: u32) -> Result<u32> {
        Ok(0)
    }
}

impl Port for Null {
    fn read(&mut self, _: &mut [u8]) -> Result<usize> {
        Ok(0)
    }

    fn write_all(&mut self, _: &[u8]) -> Result<()> {
        Ok(())
    }
}

impl Pins for Null {
    fn set(&mut self, _: Output, _: bool) -> Result<()> {
        Ok(())
    }

    fn level(&mut self, _: Input) -> Result<bool> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_zero() {
        let mut null = Null::new();
        null.send(0x8400_0000).unwrap();
        assert_eq!(null.send_receive(0x8400_0000).unwrap(), 0);

        let mut buf = [0xffu8; 4];
        assert_eq!(Port::read(&mut null, &mut buf).unwrap(), 0);
        assert!(!null.is_configured().unwrap());
    }
}
