use ark_ff::PrimeField;
use ark_std::rand::Rng;

use crate::share::ShareError;

/// Splits a secret into `n_parties` additive shares.
///
/// The first `n_parties - 1` shares are drawn uniformly at random, consuming
/// randomness in share-index order; the last share balances the sum so that
/// the shares add up to the secret. Any strict subset of the shares is
/// uniformly distributed and reveals nothing about the secret.
pub fn split<F: PrimeField>(
    secret: F,
    n_parties: usize,
    rng: &mut impl Rng,
) -> Result<Vec<F>, ShareError> {
    if n_parties == 0 {
        return Err(ShareError::NoParties);
    }
    let mut shares = Vec::with_capacity(n_parties);
    let mut partial_sum = F::zero();
    for _ in 0..n_parties - 1 {
        let share = F::rand(rng);
        partial_sum += share;
        shares.push(share);
    }
    shares.push(secret - partial_sum);
    Ok(shares)
}

/// Recovers the secret as the sum of all shares. An empty slice yields zero.
pub fn reconstruct<F: PrimeField>(shares: &[F]) -> F {
    shares.iter().sum()
}

/// Splits the information-theoretic MAC `secret * key` into additive shares.
pub fn mac_split<F: PrimeField>(
    secret: F,
    key: F,
    n_parties: usize,
    rng: &mut impl Rng,
) -> Result<Vec<F>, ShareError> {
    split(secret * key, n_parties, rng)
}

/// Checks an opened value against its opened MAC under the global key.
pub fn mac_verify<F: PrimeField>(value: F, mac: F, key: F) -> bool {
    value * key == mac
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::field::Fp;
    use ark_ff::{UniformRand, Zero};
    use ark_std::rand::{rngs::StdRng, SeedableRng};
    use ark_std::test_rng;

    #[test]
    fn should_recover_secret() {
        let mut rng = test_rng();
        let secret = Fp::from(918520u64);
        let shares = split(secret, 6, &mut rng).unwrap();
        assert_eq!(shares.len(), 6);
        assert_eq!(reconstruct(&shares), secret);
    }

    #[test]
    fn splitting_among_one_party_returns_the_secret() {
        let mut rng = test_rng();
        let secret = Fp::from(42u64);
        let shares = split(secret, 1, &mut rng).unwrap();
        assert_eq!(shares, vec![secret]);
    }

    #[test]
    fn splitting_among_zero_parties_fails() {
        let mut rng = test_rng();
        let err = split(Fp::from(1u64), 0, &mut rng).unwrap_err();
        assert_eq!(err, ShareError::NoParties);
    }

    #[test]
    fn shares_of_zero_still_sum_to_zero() {
        let mut rng = test_rng();
        let shares = split(Fp::zero(), 5, &mut rng).unwrap();
        assert!(shares.iter().any(|share| !share.is_zero()));
        assert!(reconstruct(&shares).is_zero());
    }

    #[test]
    fn reconstructing_nothing_yields_zero() {
        assert!(reconstruct::<Fp>(&[]).is_zero());
    }

    #[test]
    fn should_add_shares_locally() {
        let mut rng = test_rng();
        let secret_x = Fp::from(10u64);
        let secret_y = Fp::from(20u64);
        let shares_x = split(secret_x, 4, &mut rng).unwrap();
        let shares_y = split(secret_y, 4, &mut rng).unwrap();

        let added: Vec<Fp> = shares_x
            .iter()
            .zip(&shares_y)
            .map(|(x, y)| *x + *y)
            .collect();
        assert_eq!(reconstruct(&added), secret_x + secret_y);
    }

    #[test]
    fn randomness_is_consumed_in_share_index_order() {
        let secret = Fp::from(1234u64);
        let mut rng = StdRng::seed_from_u64(7);
        let shares = split(secret, 4, &mut rng).unwrap();

        let mut replay = StdRng::seed_from_u64(7);
        let expected: Vec<Fp> = (0..3).map(|_| Fp::rand(&mut replay)).collect();
        assert_eq!(&shares[..3], &expected[..]);
    }

    #[test]
    fn mac_shares_reconstruct_the_mac() {
        let mut rng = test_rng();
        let key = Fp::from(2u64);
        let secret = Fp::from(12u64);
        let mac_shares = mac_split(secret, key, 3, &mut rng).unwrap();
        assert_eq!(reconstruct(&mac_shares), Fp::from(24u64));
        assert!(mac_verify(secret, reconstruct(&mac_shares), key));
    }

    #[test]
    fn a_tampered_mac_fails_verification() {
        let key = Fp::from(2u64);
        assert!(mac_verify(Fp::from(35u64), Fp::from(70u64), key));
        assert!(!mac_verify(
            Fp::from(35u64),
            Fp::from(70u64) + Fp::from(1u64),
            key
        ));
    }
}
