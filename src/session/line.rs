const CRLF: &[u8] = b"\r\n";

/// Longest unterminated line kept before it is thrown away
pub const MAX_LINE: usize = 4096;

/// Accumulates bytes read from the client and hands them out one line at a time.
///
/// Only CRLF ends a line, a bare LF is kept as ordinary data.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    limit: usize,
    // Dropping the tail of an overlong line until its CRLF arrives
    discarding: bool,
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(CRLF.len()).position(|w| w == CRLF)
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::with_limit(MAX_LINE)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::with_capacity(1024),
            limit,
            discarding: false,
        }
    }

    /// Append bytes read from the transport
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if self.discarding {
            match find_crlf(&self.buf) {
                Some(pos) => {
                    self.buf.drain(..pos + CRLF.len());
                    self.discarding = false;
                }
                None => {
                    // Keep a trailing CR, its LF may be in the next read
                    let keep = self.buf.len().saturating_sub(1);
                    self.buf.drain(..keep);
                }
            }
        }
    }

    /// Remove and return the first complete line, including its CRLF
    pub fn take_line(&mut self) -> Option<Vec<u8>> {
        let end = find_crlf(&self.buf)? + CRLF.len();
        let rest = self.buf.split_off(end);
        Some(std::mem::replace(&mut self.buf, rest))
    }

    /// Drop a partial line longer than the limit, and the rest of it as it arrives.
    /// Returns true the first time a line is dropped.
    pub fn overflowed(&mut self) -> bool {
        if self.discarding || self.buf.len() <= self.limit || find_crlf(&self.buf).is_some() {
            return false;
        }
        self.buf.clear();
        self.discarding = true;
        true
    }

    /// Put back bytes that were taken but not consumed
    pub fn unread(&mut self, bytes: &[u8]) {
        if !bytes.is_empty() {
            self.buf.splice(0..0, bytes.iter().copied());
        }
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.buf.clear();
        self.discarding = false;
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(buffer: &mut LineBuffer) -> Vec<Vec<u8>> {
        std::iter::from_fn(|| buffer.take_line()).collect()
    }

    #[test]
    fn whole_lines() {
        let mut buffer = LineBuffer::new();
        buffer.extend(b"HELO a\r\nNOOP\r\n");
        assert_eq!(drain(&mut buffer), vec![b"HELO a\r\n".to_vec(), b"NOOP\r\n".to_vec()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn partial_line_is_kept() {
        let mut buffer = LineBuffer::new();
        buffer.extend(b"HELO a\r\nNO");
        assert_eq!(buffer.take_line(), Some(b"HELO a\r\n".to_vec()));
        assert_eq!(buffer.take_line(), None);
        assert_eq!(buffer.len(), 2);
        buffer.extend(b"OP\r");
        assert_eq!(buffer.take_line(), None);
        buffer.extend(b"\n");
        assert_eq!(buffer.take_line(), Some(b"NOOP\r\n".to_vec()));
    }

    #[test]
    fn bare_lf_is_not_a_terminator() {
        let mut buffer = LineBuffer::new();
        buffer.extend(b"NOOP\nQUIT\n");
        assert_eq!(buffer.take_line(), None);
        buffer.extend(b"\r\n");
        assert_eq!(buffer.take_line(), Some(b"NOOP\nQUIT\n\r\n".to_vec()));
    }

    #[test]
    fn every_split_point() {
        let stream = b"EHLO x\r\nMAIL FROM:<a@b>\r\nRCPT TO:<c@d>\r\nDATA\r\n";
        for split in 0..=stream.len() {
            let mut buffer = LineBuffer::new();
            let mut lines = Vec::new();
            for chunk in [&stream[..split], &stream[split..]] {
                buffer.extend(chunk);
                lines.extend(drain(&mut buffer));
            }
            assert_eq!(lines.concat(), stream.to_vec(), "split at {}", split);
            assert_eq!(lines.len(), 4, "split at {}", split);
        }
    }

    #[test]
    fn overlong_line_is_dropped() {
        let mut buffer = LineBuffer::with_limit(8);
        buffer.extend(b"NOOP\r\nMAIL FROM:<a");
        assert_eq!(buffer.take_line(), Some(b"NOOP\r\n".to_vec()));
        assert!(buffer.overflowed());
        assert!(buffer.is_empty());
        buffer.extend(b"@b.c> and more\r");
        assert!(!buffer.overflowed());
        assert_eq!(buffer.take_line(), None);
        buffer.extend(b"\nQUIT\r\n");
        assert_eq!(drain(&mut buffer), vec![b"QUIT\r\n".to_vec()]);
        assert!(!buffer.overflowed());
    }

    #[test]
    fn short_partial_line_is_kept() {
        let mut buffer = LineBuffer::with_limit(8);
        buffer.extend(b"NOOP");
        assert!(!buffer.overflowed());
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn unread_goes_to_the_front() {
        let mut buffer = LineBuffer::new();
        buffer.extend(b"A\r\nB\r\n");
        let line = buffer.take_line().unwrap();
        buffer.unread(&line[1..]);
        assert_eq!(buffer.take_line(), Some(b"\r\n".to_vec()));
        assert_eq!(buffer.take_line(), Some(b"B\r\n".to_vec()));
    }
}
